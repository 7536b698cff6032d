use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::transaction;
use crate::entities::{order, order_item, ItemStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::checkout::pricing::to_minor_units;
use crate::services::payment_gateway::{GatewayOrder, GatewayOrderRequest, PaymentGateway};
use crate::services::reversals::find_owned_order;

/// Retrying payment for orders whose gateway payment did not complete.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    currency: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            currency,
        }
    }

    /// Creates a fresh gateway order for an unpaid order.
    #[instrument(skip(self))]
    pub async fn repay(
        &self,
        user_id: Uuid,
        order_id: Option<Uuid>,
    ) -> Result<GatewayOrder, ServiceError> {
        let order_id =
            order_id.ok_or_else(|| ServiceError::BadRequest("Order ID is required".to_string()))?;
        let order = find_owned_order(&*self.db, user_id, order_id).await?;

        if order.total_amount <= 0 {
            return Err(ServiceError::BadRequest("Invalid order amount".to_string()));
        }
        if order.payment_status == PaymentStatus::Success {
            return Err(ServiceError::Conflict("Order is already paid".to_string()));
        }

        let request =
            GatewayOrderRequest::new(to_minor_units(order.total_amount), self.currency.clone());
        let gateway_order = self.gateway.create_order(request).await?;
        info!(order_number = order.order_number, gateway_order_id = %gateway_order.id, "repayment order created");
        Ok(gateway_order)
    }

    /// Marks the order paid and confirms its pending items.
    #[instrument(skip(self))]
    pub async fn confirm_repayment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        const OP: &str = "orders.repayment_confirm";
        let txn = transaction::begin(&self.db, OP).await?;
        let outcome = confirm_in(&txn, user_id, order_id).await;
        let order = transaction::finish(txn, outcome, OP).await?;

        self.event_sender
            .send_or_log(Event::OrderPaymentConfirmed { order_id })
            .await;
        Ok(order)
    }
}

async fn confirm_in(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    let order = find_owned_order(txn, user_id, order_id).await?;

    let mut active: order::ActiveModel = order.into();
    active.payment_status = Set(PaymentStatus::Success);
    let order = active.update(txn).await?;

    order_item::Entity::update_many()
        .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Confirmed))
        .filter(order_item::Column::OrderId.eq(order.id))
        .filter(order_item::Column::Status.eq(ItemStatus::Pending))
        .exec(txn)
        .await?;

    Ok(order)
}
