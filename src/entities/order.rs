use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order_item::ItemStatus;

/// How an order is paid for. Each variant carries its own settlement and
/// refund behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "COD")]
    #[serde(rename = "COD")]
    Cod,
    #[sea_orm(string_value = "Wallet")]
    Wallet,
    #[sea_orm(string_value = "Razorpay")]
    Razorpay,
}

impl PaymentMethod {
    /// COD and Wallet settle synchronously and must hold the checkout lock
    /// for the duration of settlement. Razorpay takes it when the gateway
    /// order is created instead.
    pub fn requires_checkout_lock(self) -> bool {
        matches!(self, Self::Cod | Self::Wallet)
    }

    pub fn debits_wallet(self) -> bool {
        matches!(self, Self::Wallet)
    }

    /// Money collected up front is returned to the wallet on cancellation.
    pub fn refunds_on_cancel(self) -> bool {
        matches!(self, Self::Wallet | Self::Razorpay)
    }

    pub fn initial_item_status(self, payment_status: PaymentStatus) -> ItemStatus {
        match (self, payment_status) {
            (Self::Razorpay, PaymentStatus::Pending) => ItemStatus::Pending,
            _ => ItemStatus::Confirmed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cod => "COD",
            Self::Wallet => "Wallet",
            Self::Razorpay => "Razorpay",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Success")]
    Success,
    #[sea_orm(string_value = "Failed")]
    Failed,
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(Self::Pending),
            "Success" => Some(Self::Success),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A settled checkout. Items carry the mutable lifecycle; the order header is
/// immutable apart from `payment_status`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// 8-digit customer-facing order number
    #[sea_orm(unique)]
    pub order_number: i64,
    pub user_id: Uuid,
    /// `AddressSnapshot` taken at settlement
    pub address: Json,
    pub total_amount: i64,
    pub discount: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cod_cancellations_are_not_refunded() {
        assert!(!PaymentMethod::Cod.refunds_on_cancel());
        assert!(PaymentMethod::Wallet.refunds_on_cancel());
        assert!(PaymentMethod::Razorpay.refunds_on_cancel());
    }

    #[test]
    fn lock_and_wallet_behaviour_per_method() {
        assert!(PaymentMethod::Cod.requires_checkout_lock());
        assert!(PaymentMethod::Wallet.requires_checkout_lock());
        assert!(!PaymentMethod::Razorpay.requires_checkout_lock());

        assert!(PaymentMethod::Wallet.debits_wallet());
        assert!(!PaymentMethod::Cod.debits_wallet());
        assert!(!PaymentMethod::Razorpay.debits_wallet());
    }

    #[test]
    fn only_pending_gateway_payments_start_pending() {
        assert_eq!(
            PaymentMethod::Razorpay.initial_item_status(PaymentStatus::Pending),
            ItemStatus::Pending
        );
        assert_eq!(
            PaymentMethod::Razorpay.initial_item_status(PaymentStatus::Success),
            ItemStatus::Confirmed
        );
        assert_eq!(
            PaymentMethod::Cod.initial_item_status(PaymentStatus::Pending),
            ItemStatus::Confirmed
        );
    }

    #[test]
    fn wire_names_match_storefront_values() {
        assert_eq!(serde_json::to_string(&PaymentMethod::Cod).unwrap(), "\"COD\"");
        let parsed: PaymentMethod = serde_json::from_str("\"Razorpay\"").unwrap();
        assert_eq!(parsed, PaymentMethod::Razorpay);
        assert_eq!(PaymentStatus::parse("Success"), Some(PaymentStatus::Success));
        assert_eq!(PaymentStatus::parse("paid"), None);
    }
}
