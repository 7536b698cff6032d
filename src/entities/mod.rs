pub mod address;
pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod product;
pub mod user;
pub mod wallet;
pub mod wallet_transaction;

pub use order::{PaymentMethod, PaymentStatus};
pub use order_item::{ItemStatus, ReturnApproval};
pub use wallet_transaction::WalletTransactionType;
