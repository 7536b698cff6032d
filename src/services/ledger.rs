//! Append-only wallet ledger.
//!
//! Every balance change goes through [`LedgerService::credit`] or
//! [`LedgerService::debit`], which write the new balance and exactly one
//! `wallet_transactions` row recording `previous_balance` and `new_balance`.
//! Both take any [`ConnectionTrait`], so callers run them inside their own
//! transaction.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::{wallet, wallet_transaction, WalletTransactionType};
use crate::errors::ServiceError;

/// Result of one ledger posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Posting {
    pub wallet_id: Uuid,
    pub entry_id: Uuid,
    pub previous_balance: i64,
    pub new_balance: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerIntegrityError {
    #[error("entry {sequence} expected previous balance {expected}, found {found}")]
    BrokenChain {
        sequence: i32,
        expected: i64,
        found: i64,
    },
    #[error("entry {sequence} does not add up: {previous} + {signed} != {new}")]
    BadArithmetic {
        sequence: i32,
        previous: i64,
        signed: i64,
        new: i64,
    },
    #[error("entry {found} out of order, expected sequence {expected}")]
    Gap { expected: i32, found: i32 },
}

/// Replays a wallet's history from a zero balance and returns the final
/// balance, checking that every entry chains onto the previous one.
pub fn replay(entries: &[wallet_transaction::Model]) -> Result<i64, LedgerIntegrityError> {
    let mut balance = 0i64;
    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as i32 + 1;
        if entry.sequence != expected_sequence {
            return Err(LedgerIntegrityError::Gap {
                expected: expected_sequence,
                found: entry.sequence,
            });
        }
        if entry.previous_balance != balance {
            return Err(LedgerIntegrityError::BrokenChain {
                sequence: entry.sequence,
                expected: balance,
                found: entry.previous_balance,
            });
        }
        let signed = entry.signed_amount();
        if entry.previous_balance + signed != entry.new_balance {
            return Err(LedgerIntegrityError::BadArithmetic {
                sequence: entry.sequence,
                previous: entry.previous_balance,
                signed,
                new: entry.new_balance,
            });
        }
        balance = entry.new_balance;
    }
    Ok(balance)
}

#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DatabaseConnection>,
}

impl LedgerService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Current balance, zero when the user has no wallet yet.
    pub async fn balance(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        balance_of(&*self.db, user_id).await
    }

    /// Full history, oldest first.
    pub async fn history(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
        history_of(&*self.db, user_id).await
    }

    /// Replays the history and compares it to the stored balance.
    #[instrument(skip(self))]
    pub async fn verify(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        let Some(wallet) = find_wallet(&*self.db, user_id).await? else {
            return Ok(0);
        };
        let entries = history_of(&*self.db, user_id).await?;
        let replayed =
            replay(&entries).map_err(|e| ServiceError::InternalError(e.to_string()))?;
        if replayed != wallet.balance {
            return Err(ServiceError::InternalError(format!(
                "wallet {} balance {} does not match replayed history {}",
                wallet.id, wallet.balance, replayed
            )));
        }
        Ok(replayed)
    }

    /// Adds `amount` to the user's wallet, creating it if needed.
    pub async fn credit<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        amount: i64,
        kind: WalletTransactionType,
        description: Option<String>,
    ) -> Result<Posting, ServiceError> {
        if kind.is_debit() {
            return Err(ServiceError::InvalidOperation(
                "credit posted with a debit type".to_string(),
            ));
        }
        let wallet = find_or_create_wallet(conn, user_id).await?;
        post(conn, wallet, amount, kind, description).await
    }

    /// Adds `amount` to an existing wallet. A missing wallet is an error,
    /// since the refund it represents must not be dropped.
    pub async fn credit_existing<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        amount: i64,
        kind: WalletTransactionType,
        description: Option<String>,
    ) -> Result<Posting, ServiceError> {
        if kind.is_debit() {
            return Err(ServiceError::InvalidOperation(
                "credit posted with a debit type".to_string(),
            ));
        }
        let wallet = find_wallet(conn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet for user {} not found", user_id)))?;
        post(conn, wallet, amount, kind, description).await
    }

    /// Subtracts `amount`, creating the wallet if needed. Sufficiency is the
    /// caller's policy; this never clamps or rejects on balance.
    pub async fn debit<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        amount: i64,
        description: Option<String>,
    ) -> Result<Posting, ServiceError> {
        let wallet = find_or_create_wallet(conn, user_id).await?;
        post(
            conn,
            wallet,
            amount,
            WalletTransactionType::Debit,
            description,
        )
        .await
    }
}

pub async fn find_wallet<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<wallet::Model>, ServiceError> {
    Ok(wallet::Entity::find()
        .filter(wallet::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

pub async fn balance_of<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<i64, ServiceError> {
    Ok(find_wallet(conn, user_id)
        .await?
        .map(|w| w.balance)
        .unwrap_or(0))
}

pub async fn history_of<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
    Ok(wallet_transaction::Entity::find()
        .filter(wallet_transaction::Column::UserId.eq(user_id))
        .order_by_asc(wallet_transaction::Column::Sequence)
        .all(conn)
        .await?)
}

async fn find_or_create_wallet<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<wallet::Model, ServiceError> {
    if let Some(wallet) = find_wallet(conn, user_id).await? {
        return Ok(wallet);
    }
    let now = Utc::now();
    let wallet = wallet::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        balance: Set(0),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    debug!(%user_id, wallet_id = %wallet.id, "wallet created");
    Ok(wallet)
}

async fn post<C: ConnectionTrait>(
    conn: &C,
    wallet: wallet::Model,
    amount: i64,
    kind: WalletTransactionType,
    description: Option<String>,
) -> Result<Posting, ServiceError> {
    if amount <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "ledger amount must be positive, got {}",
            amount
        )));
    }

    let previous_balance = wallet.balance;
    let new_balance = if kind.is_debit() {
        previous_balance - amount
    } else {
        previous_balance + amount
    };
    let now = Utc::now();

    // Compare-and-set on the version read above
    let updated = wallet::Entity::update_many()
        .col_expr(wallet::Column::Balance, Expr::value(new_balance))
        .col_expr(wallet::Column::Version, Expr::value(wallet.version + 1))
        .col_expr(wallet::Column::UpdatedAt, Expr::value(now))
        .filter(wallet::Column::Id.eq(wallet.id))
        .filter(wallet::Column::Version.eq(wallet.version))
        .exec(conn)
        .await?;
    if updated.rows_affected != 1 {
        return Err(ServiceError::ConcurrentModification(wallet.id));
    }

    let entry = wallet_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        wallet_id: Set(wallet.id),
        user_id: Set(wallet.user_id),
        sequence: Set(wallet.version + 1),
        amount: Set(amount),
        transaction_type: Set(kind),
        previous_balance: Set(previous_balance),
        new_balance: Set(new_balance),
        description: Set(description),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    counter!("storefront_ledger.entries", 1, "type" => ledger_label(kind));
    debug!(
        user_id = %wallet.user_id,
        amount,
        ?kind,
        previous_balance,
        new_balance,
        "ledger entry appended"
    );

    Ok(Posting {
        wallet_id: wallet.id,
        entry_id: entry.id,
        previous_balance,
        new_balance,
    })
}

fn ledger_label(kind: WalletTransactionType) -> &'static str {
    match kind {
        WalletTransactionType::Credit => "credit",
        WalletTransactionType::Debit => "debit",
        WalletTransactionType::Refund => "refund",
        WalletTransactionType::Referral => "referral",
    }
}
