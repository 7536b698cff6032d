//! Order settlement: turns a validated cart into a persisted order together
//! with its stock, cart, wallet and referral side effects, in one
//! transaction.

use chrono::Utc;
use metrics::counter;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::cart::{self as cart_lines, LoadedCart};
use super::inventory::{self, StockCheck};
use super::pricing::{self, Totals};
use super::session::{CheckoutSession, SessionStore};
use crate::config::ReferralBonus;
use crate::db::transaction;
use crate::entities::address::AddressSnapshot;
use crate::entities::{
    address, order, order_item, user, PaymentMethod, PaymentStatus, ReturnApproval,
    WalletTransactionType,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::ledger::LedgerService;

const ORDER_NUMBER_ATTEMPTS: usize = 5;
const OPERATION: &str = "checkout.settle";

#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub user_id: Uuid,
    pub session_id: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub totals: Totals,
    /// Wallet balance after the debit, for wallet payments
    pub wallet_balance: Option<i64>,
    pub referral_granted: bool,
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<SessionStore>,
    event_sender: Arc<EventSender>,
    referral_bonus: ReferralBonus,
}

impl SettlementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<SessionStore>,
        event_sender: Arc<EventSender>,
        referral_bonus: ReferralBonus,
    ) -> Self {
        Self {
            db,
            sessions,
            event_sender,
            referral_bonus,
        }
    }

    /// Settles the user's cart.
    ///
    /// COD and wallet payments take the session's payment lock first; the
    /// guard releases it on every exit path. Session discount is cleared only
    /// after a successful commit.
    #[instrument(skip(self), fields(user_id = %request.user_id, method = %request.payment_method))]
    pub async fn settle(&self, request: SettlementRequest) -> Result<SettledOrder, ServiceError> {
        let lock_guard = if request.payment_method.requires_checkout_lock() {
            Some(
                self.sessions
                    .acquire_payment_lock(&request.session_id)
                    .ok_or(ServiceError::PaymentInProgress)?,
            )
        } else {
            None
        };

        let session = self.sessions.snapshot(&request.session_id);
        // Lock held since the gateway order was created
        let gateway_lock = if request.payment_method == PaymentMethod::Razorpay {
            self.sessions.lock_token(&request.session_id)
        } else {
            None
        };

        let txn = transaction::begin(&self.db, OPERATION).await?;
        let outcome = self.settle_in(&txn, &request, &session).await;
        let settled = match transaction::finish(txn, outcome, OPERATION).await {
            Ok(settled) => settled,
            Err(err) => {
                counter!("storefront_checkout.settlement_failed", 1);
                return Err(err);
            }
        };

        self.sessions.clear_discount(&request.session_id);
        drop(lock_guard);
        if let Some(token) = gateway_lock {
            self.sessions
                .release_payment_lock_if(&request.session_id, token);
        }

        counter!("storefront_checkout.settled", 1, "method" => request.payment_method.as_str());
        info!(
            order_number = settled.order.order_number,
            total_amount = settled.order.total_amount,
            "order settled"
        );

        self.emit(&settled).await;
        Ok(settled)
    }

    async fn settle_in(
        &self,
        txn: &DatabaseTransaction,
        request: &SettlementRequest,
        session: &CheckoutSession,
    ) -> Result<SettledOrder, ServiceError> {
        let user = user::Entity::find_by_id(request.user_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", request.user_id)))?;

        let LoadedCart { cart, lines } = cart_lines::load_cart(txn, user.id).await?;
        let Some(cart) = cart.filter(|_| !lines.is_empty()) else {
            return Err(ServiceError::Conflict("Your cart is empty!".to_string()));
        };

        inventory::check_stock(&lines).into_result()?;

        let totals = pricing::compute_totals(&lines, session.discount_percent);

        let index = session.address_index.ok_or_else(|| {
            ServiceError::BadRequest("Please select a delivery address".to_string())
        })?;
        let address = address::Entity::find()
            .filter(address::Column::UserId.eq(user.id))
            .order_by_asc(address::Column::CreatedAt)
            .offset(index as u64)
            .limit(1)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Selected address not found".to_string()))?;

        // Evaluated before the new order exists
        let first_order = order::Entity::find()
            .filter(order::Column::UserId.eq(user.id))
            .count(txn)
            .await?
            == 0;

        let order_number = allocate_order_number(txn).await?;
        let now = Utc::now();
        let snapshot = serde_json::to_value(AddressSnapshot::from(&address))
            .map_err(|e| ServiceError::InternalError(format!("address snapshot: {}", e)))?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            user_id: Set(user.id),
            address: Set(snapshot),
            total_amount: Set(totals.total),
            discount: Set(totals.discount),
            payment_method: Set(request.payment_method),
            payment_status: Set(request.payment_status),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        let item_status = request
            .payment_method
            .initial_item_status(request.payment_status);
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let Some(product) = &line.product else {
                continue;
            };
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                position: Set(items.len() as i32),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                category: Set(product.category.clone()),
                brand: Set(product.brand.clone()),
                price: Set(product.offer_price),
                quantity: Set(line.quantity),
                status: Set(item_status),
                return_approval: Set(ReturnApproval::NotRequested),
                reason: Set(None),
                created_at: Set(now),
            }
            .insert(txn)
            .await?;

            if !inventory::reserve_stock(txn, product.id, line.quantity).await? {
                warn!(product_id = %product.id, "stock changed during settlement");
                return Err(ServiceError::StockUnavailable(StockCheck {
                    out_of_stock: Vec::new(),
                    max_exceed: vec![product.name.clone()],
                }));
            }
            items.push(item);
        }

        cart_lines::empty_cart(txn, cart.id).await?;

        let wallet_balance = if request.payment_method.debits_wallet() {
            Some(self.debit_wallet(txn, user.id, &order, totals.total).await?)
        } else {
            None
        };

        let referral_granted = if first_order {
            self.grant_referral_bonus(txn, &user).await?
        } else {
            false
        };

        Ok(SettledOrder {
            order,
            items,
            totals,
            wallet_balance,
            referral_granted,
        })
    }

    async fn debit_wallet(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        order: &order::Model,
        total: i64,
    ) -> Result<i64, ServiceError> {
        let balance = crate::services::ledger::balance_of(txn, user_id).await?;
        if balance < total {
            return Err(ServiceError::InsufficientFunds {
                balance,
                required: total,
            });
        }
        if total == 0 {
            return Ok(balance);
        }
        let posting = LedgerService::debit(
            txn,
            user_id,
            total,
            Some(format!("Payment for order #{}", order.order_number)),
        )
        .await?;
        Ok(posting.new_balance)
    }

    /// Credits referrer and referee on the referee's first order. A missing
    /// or self-referencing code simply skips the bonus.
    async fn grant_referral_bonus(
        &self,
        txn: &DatabaseTransaction,
        referee: &user::Model,
    ) -> Result<bool, ServiceError> {
        let Some(code) = referee
            .referred_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            return Ok(false);
        };

        let Some(referrer) = user::Entity::find()
            .filter(user::Column::ReferralCode.eq(code))
            .one(txn)
            .await?
        else {
            return Ok(false);
        };
        if referrer.id == referee.id {
            return Ok(false);
        }

        if self.referral_bonus.referrer > 0 {
            LedgerService::credit(
                txn,
                referrer.id,
                self.referral_bonus.referrer,
                WalletTransactionType::Referral,
                Some(format!("Referral bonus for inviting {}", referee.name)),
            )
            .await?;
        }
        if self.referral_bonus.referee > 0 {
            LedgerService::credit(
                txn,
                referee.id,
                self.referral_bonus.referee,
                WalletTransactionType::Referral,
                Some("Welcome referral bonus".to_string()),
            )
            .await?;
        }
        counter!("storefront_checkout.referral_granted", 1);
        Ok(true)
    }

    async fn emit(&self, settled: &SettledOrder) {
        let order = &settled.order;
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                order_number: order.order_number,
                user_id: order.user_id,
                total_amount: order.total_amount,
                payment_method: order.payment_method,
            })
            .await;
        if let Some(new_balance) = settled.wallet_balance {
            self.event_sender
                .send_or_log(Event::WalletDebited {
                    user_id: order.user_id,
                    amount: order.total_amount,
                    new_balance,
                })
                .await;
        }
    }
}

fn random_order_number() -> i64 {
    rand::thread_rng().gen_range(10_000_000..=99_999_999)
}

/// Picks an unused 8-digit order number. The unique index on
/// `orders.order_number` still rejects a collision that slips past the check.
async fn allocate_order_number<C: ConnectionTrait>(conn: &C) -> Result<i64, ServiceError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = random_order_number();
        let taken = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(candidate))
            .count(conn)
            .await?
            > 0;
        if !taken {
            return Ok(candidate);
        }
        warn!(candidate, "order number collision, retrying");
    }
    Err(ServiceError::InternalError(
        "could not allocate a unique order number".to_string(),
    ))
}
