use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum WalletTransactionType {
    #[sea_orm(string_value = "Credit")]
    Credit,
    #[sea_orm(string_value = "Debit")]
    Debit,
    #[sea_orm(string_value = "Refund")]
    Refund,
    #[sea_orm(string_value = "Referral")]
    Referral,
}

impl WalletTransactionType {
    pub fn is_debit(self) -> bool {
        matches!(self, Self::Debit)
    }
}

/// Immutable ledger entry. Rows are only ever inserted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: Uuid,
    /// Position in the wallet's history, starting at 1
    pub sequence: i32,
    /// Always positive; direction comes from `transaction_type`
    pub amount: i64,
    pub transaction_type: WalletTransactionType,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn signed_amount(&self) -> i64 {
        if self.transaction_type.is_debit() {
            -self.amount
        } else {
            self.amount
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::WalletId",
        to = "super::wallet::Column::Id"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
