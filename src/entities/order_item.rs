use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ItemStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Confirmed")]
    Confirmed,
    #[sea_orm(string_value = "Shipped")]
    Shipped,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Returned")]
    Returned,
}

impl ItemStatus {
    /// Statuses an admin may set from the order detail screen.
    pub const ADMIN_SETTABLE: [ItemStatus; 4] = [
        ItemStatus::Confirmed,
        ItemStatus::Shipped,
        ItemStatus::Cancelled,
        ItemStatus::Delivered,
    ];

    /// A customer may cancel only before the item is delivered.
    pub fn is_cancellable(self) -> bool {
        !matches!(self, Self::Cancelled | Self::Delivered | Self::Returned)
    }
}

/// Return workflow state, stored as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(into = "i32", try_from = "i32")]
pub enum ReturnApproval {
    #[sea_orm(num_value = 0)]
    NotRequested,
    #[sea_orm(num_value = 1)]
    Requested,
    #[sea_orm(num_value = 2)]
    Approved,
    #[sea_orm(num_value = 3)]
    Declined,
}

impl From<ReturnApproval> for i32 {
    fn from(value: ReturnApproval) -> Self {
        match value {
            ReturnApproval::NotRequested => 0,
            ReturnApproval::Requested => 1,
            ReturnApproval::Approved => 2,
            ReturnApproval::Declined => 3,
        }
    }
}

impl TryFrom<i32> for ReturnApproval {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotRequested),
            1 => Ok(Self::Requested),
            2 => Ok(Self::Approved),
            3 => Ok(Self::Declined),
            other => Err(format!("invalid return approval code {other}")),
        }
    }
}

/// Price and quantity snapshot of one cart line, plus its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    /// Zero-based line number within the order
    pub position: i32,
    pub product_id: Uuid,
    pub product_name: String,
    pub category: String,
    pub brand: String,
    pub price: i64,
    pub quantity: i32,
    pub status: ItemStatus,
    pub return_approval: ReturnApproval,
    /// Cancellation or return reason
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_approval_serializes_as_code() {
        assert_eq!(serde_json::to_string(&ReturnApproval::Approved).unwrap(), "2");
        let parsed: ReturnApproval = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, ReturnApproval::Requested);
        assert!(serde_json::from_str::<ReturnApproval>("7").is_err());
    }

    #[test]
    fn terminal_statuses_are_not_cancellable() {
        assert!(ItemStatus::Pending.is_cancellable());
        assert!(ItemStatus::Shipped.is_cancellable());
        assert!(!ItemStatus::Cancelled.is_cancellable());
        assert!(!ItemStatus::Delivered.is_cancellable());
        assert!(!ItemStatus::Returned.is_cancellable());
    }
}
