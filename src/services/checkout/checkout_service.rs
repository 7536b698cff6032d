use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::cart::{load_cart, CartLine};
use super::inventory::check_stock;
use super::pricing::{self, Totals};
use super::session::SessionStore;
use crate::entities::{address, coupon, user};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::ledger;
use crate::services::payment_gateway::{GatewayOrder, GatewayOrderRequest, PaymentGateway};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub offer_price: i64,
    pub quantity: i32,
    pub stock: i32,
    pub line_total: i64,
}

impl CartLineView {
    fn from_line(line: &CartLine) -> Option<Self> {
        let product = line.product.as_ref()?;
        Some(Self {
            product_id: product.id,
            name: product.name.clone(),
            offer_price: product.offer_price,
            quantity: line.quantity,
            stock: product.stock,
            line_total: line.line_total(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPage {
    pub addresses: Vec<address::Model>,
    pub current_page: u64,
    pub total_pages: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    pub user: user::Model,
    pub address_page: AddressPage,
    pub cart: Vec<CartLineView>,
    pub coupons: Vec<coupon::Model>,
    pub discount_percent: i32,
    pub totals: Totals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub address: address::Model,
    pub totals: Totals,
    pub wallet_balance: i64,
    pub gateway_key_id: String,
}

#[derive(Debug, Clone)]
pub enum CheckoutPage {
    EmptyCart,
    Ready(Box<CheckoutView>),
}

#[derive(Debug, Clone)]
pub enum PaymentPage {
    NoAddress,
    EmptyCart,
    Ready(Box<PaymentView>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_percent: i32,
    pub totals: Totals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlacedView {
    pub status: Option<String>,
    pub cart_count: usize,
}

/// Pre-settlement checkout steps: validation, coupons, address selection and
/// gateway order creation.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<SessionStore>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    currency: String,
    gateway_key_id: String,
    address_page_size: u64,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        currency: String,
        gateway_key_id: String,
        address_page_size: u64,
    ) -> Self {
        Self {
            db,
            sessions,
            gateway,
            event_sender,
            currency,
            gateway_key_id,
            address_page_size: address_page_size.max(1),
        }
    }

    /// Checks the cart against live stock before the checkout page. Clears
    /// any discount left over from an earlier visit.
    #[instrument(skip(self))]
    pub async fn validate_cart(&self, user_id: Uuid, session_id: &str) -> Result<(), ServiceError> {
        let cart = load_cart(&*self.db, user_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::Conflict("Your cart is empty!".to_string()));
        }
        check_stock(&cart.lines).into_result()?;
        self.sessions.clear_discount(session_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn checkout_view(
        &self,
        user_id: Uuid,
        session_id: &str,
        page: u64,
    ) -> Result<CheckoutPage, ServiceError> {
        let user = self.find_user(user_id).await?;
        let cart = load_cart(&*self.db, user_id).await?;
        if cart.is_empty() {
            return Ok(CheckoutPage::EmptyCart);
        }

        let session = self.sessions.snapshot(session_id);
        let totals = pricing::compute_totals(&cart.lines, session.discount_percent);
        let now = self.sessions.now();
        let coupons = coupon::Entity::find()
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::Expiry.gte(now))
            .filter(coupon::Column::MinPrice.lte(totals.subtotal))
            .order_by_desc(coupon::Column::DiscountPercent)
            .all(&*self.db)
            .await?;

        let address_page = self.address_page(user_id, page).await?;

        Ok(CheckoutPage::Ready(Box::new(CheckoutView {
            user,
            address_page,
            cart: cart.lines.iter().filter_map(CartLineView::from_line).collect(),
            coupons,
            discount_percent: session.discount_percent,
            totals,
        })))
    }

    async fn address_page(&self, user_id: Uuid, page: u64) -> Result<AddressPage, ServiceError> {
        let paginator = address::Entity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_asc(address::Column::CreatedAt)
            .paginate(&*self.db, self.address_page_size);
        let total_count = paginator.num_items().await?;
        let total_pages = total_count.div_ceil(self.address_page_size).max(1);
        let current_page = page.clamp(1, total_pages);
        let addresses = paginator.fetch_page(current_page - 1).await?;
        Ok(AddressPage {
            addresses,
            current_page,
            total_pages,
            total_count,
        })
    }

    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Uuid,
        session_id: &str,
        code: &str,
    ) -> Result<AppliedCoupon, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::BadRequest("Coupon code is required".to_string()));
        }
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::BadRequest("Invalid coupon code".to_string()))?;

        let cart = load_cart(&*self.db, user_id).await?;
        let subtotal = pricing::subtotal(&cart.lines);
        let now = self.sessions.now();
        if !coupon.is_active {
            return Err(ServiceError::BadRequest("Coupon is not active".to_string()));
        }
        if coupon.expiry < now {
            return Err(ServiceError::BadRequest("Coupon has expired".to_string()));
        }
        if !coupon.applies_to(subtotal, now) {
            return Err(ServiceError::BadRequest(format!(
                "Minimum order value for this coupon is {}",
                coupon.min_price
            )));
        }

        self.sessions.set_discount(session_id, coupon.discount_percent);
        info!(code = %coupon.code, percent = coupon.discount_percent, "coupon applied");
        Ok(AppliedCoupon {
            code: coupon.code,
            discount_percent: coupon.discount_percent,
            totals: pricing::totals_for_subtotal(subtotal, coupon.discount_percent),
        })
    }

    pub fn remove_coupon(&self, session_id: &str) {
        self.sessions.clear_discount(session_id);
    }

    /// Stores the chosen address position after re-checking stock.
    #[instrument(skip(self))]
    pub async fn select_address(
        &self,
        user_id: Uuid,
        session_id: &str,
        address_index: usize,
    ) -> Result<(), ServiceError> {
        let cart = load_cart(&*self.db, user_id).await?;
        check_stock(&cart.lines).into_result()?;

        let count = address::Entity::find()
            .filter(address::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        if address_index as u64 >= count {
            return Err(ServiceError::BadRequest("Selected address not found".to_string()));
        }

        self.sessions.set_address_index(session_id, address_index);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn payment_view(&self, user_id: Uuid, session_id: &str) -> Result<PaymentPage, ServiceError> {
        let session = self.sessions.snapshot(session_id);
        let Some(index) = session.address_index else {
            return Ok(PaymentPage::NoAddress);
        };
        let cart = load_cart(&*self.db, user_id).await?;
        if cart.is_empty() {
            return Ok(PaymentPage::EmptyCart);
        }

        let Some(address) = address::Entity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_asc(address::Column::CreatedAt)
            .paginate(&*self.db, 1)
            .fetch_page(index as u64)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(PaymentPage::NoAddress);
        };

        let totals = pricing::compute_totals(&cart.lines, session.discount_percent);
        let wallet_balance = ledger::balance_of(&*self.db, user_id).await?;

        Ok(PaymentPage::Ready(Box::new(PaymentView {
            address,
            totals,
            wallet_balance,
            gateway_key_id: self.gateway_key_id.clone(),
        })))
    }

    /// Creates a gateway order for the current cart total and keeps the
    /// payment lock until the payment is confirmed, unlocked or expires.
    #[instrument(skip(self))]
    pub async fn create_gateway_order(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let guard = self
            .sessions
            .acquire_payment_lock(session_id)
            .ok_or(ServiceError::PaymentInProgress)?;

        let cart = load_cart(&*self.db, user_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::Conflict("Your cart is empty!".to_string()));
        }
        check_stock(&cart.lines).into_result()?;

        let session = self.sessions.snapshot(session_id);
        let totals = pricing::compute_totals(&cart.lines, session.discount_percent);
        if totals.total <= 0 {
            return Err(ServiceError::BadRequest(
                "Order total must be greater than zero".to_string(),
            ));
        }

        let request =
            GatewayOrderRequest::new(pricing::to_minor_units(totals.total), self.currency.clone());
        let order = self.gateway.create_order(request).await?;

        guard.hold(order.id.clone());
        self.event_sender
            .send_or_log(Event::PaymentLockAcquired {
                session_id: session_id.to_string(),
                at: self.sessions.now(),
            })
            .await;
        Ok(order)
    }

    pub async fn unlock_payment(&self, session_id: &str) {
        if self.sessions.release_payment_lock(session_id) {
            self.event_sender
                .send_or_log(Event::PaymentLockReleased {
                    session_id: session_id.to_string(),
                })
                .await;
        }
    }

    pub async fn order_placed_view(
        &self,
        user_id: Uuid,
        status: Option<String>,
    ) -> Result<OrderPlacedView, ServiceError> {
        let cart = load_cart(&*self.db, user_id).await?;
        Ok(OrderPlacedView {
            status,
            cart_count: cart.item_count(),
        })
    }

    async fn find_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }
}
