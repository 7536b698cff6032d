//! Checkout: cart validation, pricing, the per-session payment lock and
//! order settlement.

pub mod cart;
pub mod checkout_service;
pub mod inventory;
pub mod pricing;
pub mod session;
pub mod settlement;

pub use checkout_service::{CheckoutPage, CheckoutService, PaymentPage};
pub use inventory::StockCheck;
pub use session::{Clock, ManualClock, SessionStore, SystemClock};
pub use settlement::{SettlementRequest, SettlementService, SettledOrder};
