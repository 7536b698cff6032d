/*!
 * Transaction Helper Utilities
 *
 * Explicit begin/finish pair used by every multi-step mutation. Work runs
 * against the returned `DatabaseTransaction`; `finish` commits on success and
 * rolls back on any error, so no partial write survives a failed operation.
 */

use crate::errors::ServiceError;
use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::{debug, error, warn};

/// Opens a transaction for the named operation.
pub async fn begin(
    db: &DatabaseConnection,
    operation: &'static str,
) -> Result<DatabaseTransaction, ServiceError> {
    debug!(operation, "beginning transaction");
    db.begin().await.map_err(|e| {
        error!(operation, error = %e, "failed to begin transaction");
        ServiceError::DatabaseError(e)
    })
}

/// Commits `txn` when `outcome` is `Ok`, otherwise rolls it back.
///
/// The original error is returned after a successful rollback. A failed
/// rollback is logged and surfaced as a database error.
pub async fn finish<T>(
    txn: DatabaseTransaction,
    outcome: Result<T, ServiceError>,
    operation: &'static str,
) -> Result<T, ServiceError> {
    match outcome {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                error!(operation, error = %e, "commit failed");
                counter!("storefront_db.transaction.commit_failed", 1, "operation" => operation);
                ServiceError::DatabaseError(e)
            })?;
            counter!("storefront_db.transaction.committed", 1, "operation" => operation);
            debug!(operation, "transaction committed");
            Ok(value)
        }
        Err(err) => {
            counter!("storefront_db.transaction.rolled_back", 1, "operation" => operation);
            if err.is_internal() {
                warn!(operation, error = %err, "rolling back transaction");
            } else {
                debug!(operation, error = %err, "rolling back transaction");
            }
            if let Err(rollback_err) = txn.rollback().await {
                error!(operation, error = %rollback_err, "rollback failed");
                return Err(ServiceError::DatabaseError(rollback_err));
            }
            Err(err)
        }
    }
}
