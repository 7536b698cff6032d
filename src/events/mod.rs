use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{ItemStatus, PaymentMethod, WalletTransactionType};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a committed change. A closed channel is logged
    /// and otherwise ignored.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "event dropped");
        }
    }
}

/// Domain events emitted after a change has been committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: i64,
        user_id: Uuid,
        total_amount: i64,
        payment_method: PaymentMethod,
    },
    OrderItemCancelled {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        refunded: i64,
    },
    ReturnRequested {
        order_id: Uuid,
        product_id: Uuid,
    },
    ReturnApproved {
        order_id: Uuid,
        product_id: Uuid,
        restocked: bool,
        refunded: i64,
    },
    ReturnDeclined {
        order_id: Uuid,
        product_id: Uuid,
    },
    OrderItemStatusChanged {
        order_id: Uuid,
        product_id: Uuid,
        status: ItemStatus,
    },
    OrderPaymentConfirmed {
        order_id: Uuid,
    },
    WalletCredited {
        user_id: Uuid,
        amount: i64,
        transaction_type: WalletTransactionType,
        new_balance: i64,
    },
    WalletDebited {
        user_id: Uuid,
        amount: i64,
        new_balance: i64,
    },
    PaymentLockAcquired {
        session_id: String,
        at: DateTime<Utc>,
    },
    PaymentLockReleased {
        session_id: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderItemCancelled { .. } => "order_item_cancelled",
            Event::ReturnRequested { .. } => "return_requested",
            Event::ReturnApproved { .. } => "return_approved",
            Event::ReturnDeclined { .. } => "return_declined",
            Event::OrderItemStatusChanged { .. } => "order_item_status_changed",
            Event::OrderPaymentConfirmed { .. } => "order_payment_confirmed",
            Event::WalletCredited { .. } => "wallet_credited",
            Event::WalletDebited { .. } => "wallet_debited",
            Event::PaymentLockAcquired { .. } => "payment_lock_acquired",
            Event::PaymentLockReleased { .. } => "payment_lock_released",
        }
    }
}

/// Drains the event channel, logging each event until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront_events.processed", 1, "event" => event.name());
        match &event {
            Event::OrderPlaced {
                order_number,
                user_id,
                total_amount,
                payment_method,
                ..
            } => info!(
                order_number,
                %user_id,
                total_amount,
                %payment_method,
                "order placed"
            ),
            Event::WalletCredited {
                user_id,
                amount,
                transaction_type,
                new_balance,
            } => info!(
                %user_id,
                amount,
                ?transaction_type,
                new_balance,
                "wallet credited"
            ),
            other => info!(event = other.name(), payload = ?other, "event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender
            .send_or_log(Event::ReturnDeclined {
                order_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
            })
            .await;
    }

    #[tokio::test]
    async fn delivered_events_reach_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let event = Event::PaymentLockReleased {
            session_id: "s1".into(),
        };
        sender.send(event.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(event));
    }
}
