pub mod admin_orders;
pub mod checkout;
pub mod common;
pub mod extractors;
pub mod orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::checkout::{CheckoutService, SessionStore, SettlementService};
use crate::services::ledger::LedgerService;
use crate::services::orders::OrderQueryService;
use crate::services::payment_gateway::PaymentGateway;
use crate::services::payments::PaymentService;
use crate::services::reversals::ReversalService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementService>,
    pub payments: Arc<PaymentService>,
    pub reversals: Arc<ReversalService>,
    pub orders: Arc<OrderQueryService>,
    pub ledger: Arc<LedgerService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        sessions: Arc<SessionStore>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Self {
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            sessions.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.currency.clone(),
            config.razorpay_key_id.clone(),
            config.address_page_size,
        ));
        let settlement = Arc::new(SettlementService::new(
            db_pool.clone(),
            sessions,
            event_sender.clone(),
            config.referral_bonus(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            config.currency.clone(),
        ));
        let reversals = Arc::new(ReversalService::new(db_pool.clone(), event_sender));
        let orders = Arc::new(OrderQueryService::new(
            db_pool.clone(),
            config.orders_page_size,
            config.admin_orders_page_size,
        ));
        let ledger = Arc::new(LedgerService::new(db_pool));

        Self {
            checkout,
            settlement,
            payments,
            reversals,
            orders,
            ledger,
        }
    }
}
