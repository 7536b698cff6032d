pub mod checkout;
pub mod ledger;
pub mod orders;
pub mod payment_gateway;
pub mod payments;
pub mod reversals;
