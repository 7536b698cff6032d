//! Cancellation, returns and admin status changes.
//!
//! Each flow runs in its own transaction and undoes the matching part of a
//! settlement: stock goes back on the shelf and collected money goes back to
//! the wallet.

use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::transaction;
use crate::entities::{
    order, order_item, ItemStatus, ReturnApproval, WalletTransactionType,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::checkout::inventory;
use crate::services::ledger::{LedgerService, Posting};

/// Returns with this reason are not put back into saleable stock.
pub const DEFECTIVE_RETURN_REASON: &str = "Defective or Damaged Product";

/// Outcome of a reversal, for responses and events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalOutcome {
    /// Owner of the order, and of any refunded wallet
    pub user_id: Uuid,
    pub item: order_item::Model,
    pub restocked: bool,
    pub refund: Option<Posting>,
}

impl ReversalOutcome {
    pub fn refunded_amount(&self) -> i64 {
        self.refund
            .map(|p| p.new_balance - p.previous_balance)
            .unwrap_or(0)
    }
}

/// Whether cancelling an item of this order owes the customer a refund.
/// Wallet and gateway orders refund regardless of payment status; COD never
/// does.
pub fn refund_due_on_cancel(order: &order::Model) -> bool {
    order.payment_method.refunds_on_cancel()
}

#[derive(Clone)]
pub struct ReversalService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReversalService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Customer cancellation of one item.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
        reason: String,
    ) -> Result<ReversalOutcome, ServiceError> {
        const OP: &str = "orders.cancel";
        let txn = transaction::begin(&self.db, OP).await?;
        let outcome = cancel_in(&txn, user_id, order_id, product_id, reason).await;
        let outcome = transaction::finish(txn, outcome, OP).await?;

        counter!("storefront_reversals.cancelled", 1);
        info!(%order_id, %product_id, refunded = outcome.refunded_amount(), "order item cancelled");
        self.event_sender
            .send_or_log(Event::OrderItemCancelled {
                order_id,
                product_id,
                quantity: outcome.item.quantity,
                refunded: outcome.refunded_amount(),
            })
            .await;
        self.emit_refund(&outcome).await;
        Ok(outcome)
    }

    /// Flags an item for admin review.
    #[instrument(skip(self))]
    pub async fn request_return(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
        reason: String,
    ) -> Result<order_item::Model, ServiceError> {
        let order = find_owned_order(&*self.db, user_id, order_id).await?;
        let item = find_item(&*self.db, order.id, product_id).await?;

        if item.return_approval != ReturnApproval::NotRequested {
            return Err(ServiceError::InvalidOperation(
                "A return has already been requested for this item".to_string(),
            ));
        }

        let mut active: order_item::ActiveModel = item.into();
        active.return_approval = Set(ReturnApproval::Requested);
        active.reason = Set(Some(reason));
        let item = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ReturnRequested {
                order_id,
                product_id,
            })
            .await;
        Ok(item)
    }

    /// Admin approval of a requested return. Always refunds the order owner;
    /// restocks unless the item came back defective.
    #[instrument(skip(self))]
    pub async fn approve_return(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        reason: Option<String>,
    ) -> Result<ReversalOutcome, ServiceError> {
        const OP: &str = "orders.approve_return";
        let txn = transaction::begin(&self.db, OP).await?;
        let outcome = approve_return_in(&txn, order_id, product_id, reason).await;
        let outcome = transaction::finish(txn, outcome, OP).await?;

        counter!("storefront_reversals.returns_approved", 1);
        info!(%order_id, %product_id, restocked = outcome.restocked, "return approved");
        self.event_sender
            .send_or_log(Event::ReturnApproved {
                order_id,
                product_id,
                restocked: outcome.restocked,
                refunded: outcome.refunded_amount(),
            })
            .await;
        self.emit_refund(&outcome).await;
        Ok(outcome)
    }

    /// Marks the return declined. Repeating it is a no-op.
    #[instrument(skip(self))]
    pub async fn decline_return(
        &self,
        order_id: Uuid,
        product_id: Uuid,
    ) -> Result<order_item::Model, ServiceError> {
        let item = find_item(&*self.db, order_id, product_id).await?;
        match item.return_approval {
            ReturnApproval::Declined => return Ok(item),
            ReturnApproval::Approved => {
                return Err(ServiceError::InvalidOperation(
                    "Return has already been approved".to_string(),
                ))
            }
            ReturnApproval::NotRequested | ReturnApproval::Requested => {}
        }

        let mut active: order_item::ActiveModel = item.into();
        active.return_approval = Set(ReturnApproval::Declined);
        let item = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ReturnDeclined {
                order_id,
                product_id,
            })
            .await;
        Ok(item)
    }

    /// Admin status override. Moving into `Cancelled` restocks the item but
    /// does not refund it.
    #[instrument(skip(self))]
    pub async fn admin_change_status(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        status: ItemStatus,
    ) -> Result<ReversalOutcome, ServiceError> {
        if !ItemStatus::ADMIN_SETTABLE.contains(&status) {
            return Err(ServiceError::ValidationError(format!(
                "status {:?} cannot be set by an admin",
                status
            )));
        }

        const OP: &str = "orders.admin_change_status";
        let txn = transaction::begin(&self.db, OP).await?;
        let outcome = admin_change_status_in(&txn, order_id, product_id, status).await;
        let outcome = transaction::finish(txn, outcome, OP).await?;

        self.event_sender
            .send_or_log(Event::OrderItemStatusChanged {
                order_id,
                product_id,
                status,
            })
            .await;
        Ok(outcome)
    }

    async fn emit_refund(&self, outcome: &ReversalOutcome) {
        if let Some(posting) = outcome.refund {
            self.event_sender
                .send_or_log(Event::WalletCredited {
                    user_id: outcome.user_id,
                    amount: outcome.refunded_amount(),
                    transaction_type: WalletTransactionType::Refund,
                    new_balance: posting.new_balance,
                })
                .await;
        }
    }
}

async fn cancel_in(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    reason: String,
) -> Result<ReversalOutcome, ServiceError> {
    let order = find_owned_order(txn, user_id, order_id).await?;
    let item = find_item(txn, order.id, product_id).await?;
    if !item.status.is_cancellable() {
        return Err(ServiceError::InvalidOperation(format!(
            "Item is already {:?}",
            item.status
        )));
    }

    let amount = item.line_total();
    let quantity = item.quantity;
    let mut active: order_item::ActiveModel = item.into();
    active.status = Set(ItemStatus::Cancelled);
    active.reason = Set(Some(reason));
    let item = active.update(txn).await?;

    let restocked = restock(txn, product_id, quantity).await?;

    let refund = if refund_due_on_cancel(&order) {
        Some(
            LedgerService::credit_existing(
                txn,
                order.user_id,
                amount,
                WalletTransactionType::Refund,
                Some(format!("Refund for cancelled item in order #{}", order.order_number)),
            )
            .await?,
        )
    } else {
        None
    };

    Ok(ReversalOutcome {
        user_id: order.user_id,
        item,
        restocked,
        refund,
    })
}

async fn approve_return_in(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    product_id: Uuid,
    reason: Option<String>,
) -> Result<ReversalOutcome, ServiceError> {
    let order = find_order(txn, order_id).await?;
    let item = find_item(txn, order.id, product_id).await?;
    if item.return_approval != ReturnApproval::Requested {
        return Err(ServiceError::InvalidOperation(
            "No pending return request for this item".to_string(),
        ));
    }

    let reason = reason.or_else(|| item.reason.clone());
    let defective = reason.as_deref() == Some(DEFECTIVE_RETURN_REASON);
    let amount = item.line_total();
    let quantity = item.quantity;

    let mut active: order_item::ActiveModel = item.into();
    active.return_approval = Set(ReturnApproval::Approved);
    active.status = Set(ItemStatus::Returned);
    active.reason = Set(reason);
    let item = active.update(txn).await?;

    let restocked = if defective {
        false
    } else {
        restock(txn, product_id, quantity).await?
    };

    let refund = LedgerService::credit(
        txn,
        order.user_id,
        amount,
        WalletTransactionType::Refund,
        Some(format!("Refund for returned item in order #{}", order.order_number)),
    )
    .await?;

    Ok(ReversalOutcome {
        user_id: order.user_id,
        item,
        restocked,
        refund: Some(refund),
    })
}

async fn admin_change_status_in(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    product_id: Uuid,
    status: ItemStatus,
) -> Result<ReversalOutcome, ServiceError> {
    let order = find_order(txn, order_id).await?;
    let item = find_item(txn, order.id, product_id).await?;
    let entering_cancelled = status == ItemStatus::Cancelled && item.status != ItemStatus::Cancelled;
    let quantity = item.quantity;

    let mut active: order_item::ActiveModel = item.into();
    active.status = Set(status);
    let item = active.update(txn).await?;

    let restocked = if entering_cancelled {
        restock(txn, product_id, quantity).await?
    } else {
        false
    };

    Ok(ReversalOutcome {
        user_id: order.user_id,
        item,
        restocked,
        refund: None,
    })
}

async fn restock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let restored = inventory::restore_stock(conn, product_id, quantity).await?;
    if !restored {
        warn!(%product_id, quantity, "product no longer exists, stock not restored");
    }
    Ok(restored)
}

pub(crate) async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

pub(crate) async fn find_owned_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .filter(order::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn find_item<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    product_id: Uuid,
) -> Result<order_item::Model, ServiceError> {
    order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .filter(order_item::Column::ProductId.eq(product_id))
        .order_by_asc(order_item::Column::Position)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Product not found in order".to_string()))
}
