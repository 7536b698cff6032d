#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::{
        address, cart, cart_item, coupon, order, order_item, product, user, wallet_transaction,
        WalletTransactionType,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::{
        extractors::{SESSION_ID_HEADER, USER_ID_HEADER},
        AppServices,
    },
    services::{
        checkout::{ManualClock, SessionStore},
        ledger::{self, LedgerService},
        payment_gateway::{GatewayOrder, GatewayOrderRequest, PaymentGateway},
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Gateway double that records every order request.
#[derive(Debug, Default)]
pub struct MockGateway {
    pub requests: Mutex<Vec<GatewayOrderRequest>>,
    calls: AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

impl MockGateway {
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GatewayOrderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("gateway unavailable".into()));
        }
        let order = GatewayOrder {
            id: format!("order_test_{n}"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: Some("created".into()),
        };
        self.requests.lock().unwrap().push(request);
        Ok(order)
    }
}

/// Application wired against a throwaway SQLite file and a manual clock.
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub clock: Arc<ManualClock>,
    pub sessions: Arc<SessionStore>,
    pub gateway: Arc<MockGateway>,
    router: Router,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("storefront.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.razorpay_key_id = "rzp_test_key".to_string();
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sessions = Arc::new(SessionStore::new(clock.clone(), cfg.payment_lock_ttl()));
        let gateway = Arc::new(MockGateway::default());

        let services = AppServices::new(
            db_arc.clone(),
            sessions.clone(),
            gateway.clone(),
            event_sender.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc.clone(),
            config: cfg,
            sessions: sessions.clone(),
            event_sender,
            services,
        };
        let router = storefront_api::build_router(state.clone());

        Self {
            state,
            db: db_arc,
            clock,
            sessions,
            gateway,
            router,
            _event_task: event_task,
            _dir: dir,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    // ---------- seeding ----------

    pub async fn seed_user(&self, name: &str, referral_code: &str, referred_code: Option<&str>) -> user::Model {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(format!("{}@example.com", name.to_lowercase())),
            phone: Set(None),
            referral_code: Set(referral_code.to_string()),
            referred_code: Set(referred_code.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    /// Addresses are ordered by creation time; `position` keeps them stable.
    pub async fn seed_address(&self, user_id: Uuid, city: &str, position: i64) -> address::Model {
        address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set("Home".to_string()),
            house_name: Set(format!("House {position}")),
            street: Set("MG Road".to_string()),
            city: Set(city.to_string()),
            state: Set("Kerala".to_string()),
            pincode: Set("682001".to_string()),
            phone: Set("9999999999".to_string()),
            created_at: Set(base_time() + Duration::seconds(position)),
        }
        .insert(&*self.db)
        .await
        .expect("seed address")
    }

    pub async fn seed_product(&self, name: &str, offer_price: i64, stock: i32) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category: Set("Shoes".to_string()),
            brand: Set("Acme".to_string()),
            gender: Set(Some("Unisex".to_string())),
            price: Set(offer_price + 100),
            offer_price: Set(offer_price),
            stock: Set(stock),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_percent: i32,
        min_price: i64,
        expiry: DateTime<Utc>,
        is_active: bool,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_percent: Set(discount_percent),
            min_price: Set(min_price),
            expiry: Set(expiry),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        let existing = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("find cart");
        let cart = match existing {
            Some(cart) => cart,
            None => cart::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            }
            .insert(&*self.db)
            .await
            .expect("create cart"),
        };
        let position = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .count(&*self.db)
            .await
            .expect("count cart items") as i64;
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(base_time() + Duration::seconds(position)),
        }
        .insert(&*self.db)
        .await
        .expect("add cart item");
    }

    pub async fn fund_wallet(&self, user_id: Uuid, amount: i64) {
        LedgerService::credit(
            &*self.db,
            user_id,
            amount,
            WalletTransactionType::Credit,
            Some("Top up".to_string()),
        )
        .await
        .expect("fund wallet");
    }

    /// Chooses the address at `index` for the session without going through
    /// the stock re-check.
    pub fn choose_address(&self, session_id: &str, index: usize) {
        self.sessions.set_address_index(session_id, index);
    }

    // ---------- reads ----------

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub async fn cart_len(&self, user_id: Uuid) -> u64 {
        let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
            .expect("find cart")
        else {
            return 0;
        };
        cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .count(&*self.db)
            .await
            .expect("count cart items")
    }

    pub async fn orders_of(&self, user_id: Uuid) -> Vec<order::Model> {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await
            .expect("load orders")
    }

    pub async fn items_of(&self, order_id: Uuid) -> Vec<order_item::Model> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await
            .expect("load order items")
    }

    pub async fn balance_of(&self, user_id: Uuid) -> i64 {
        ledger::balance_of(&*self.db, user_id)
            .await
            .expect("wallet balance")
    }

    pub async fn ledger_of(&self, user_id: Uuid) -> Vec<wallet_transaction::Model> {
        ledger::history_of(&*self.db, user_id)
            .await
            .expect("wallet history")
    }

    // ---------- HTTP ----------

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<Uuid>,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_in_session(method, uri, user_id, None, body).await
    }

    pub async fn request_in_session(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if let Some(session_id) = session_id {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

pub async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json response")
    };
    (status, value)
}

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}
