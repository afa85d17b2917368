//! Mapping from sqlx errors to [`StoreError`].

use turnstile_core::StoreError;

/// `lock_not_available`, raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";

/// Classify a sqlx error.
///
/// Lock timeouts, serialization failures and deadlocks are
/// [`StoreError::Contention`]; decode failures are [`StoreError::Corrupt`];
/// everything else is [`StoreError::Unavailable`].
#[must_use]
pub fn classify(error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(LOCK_NOT_AVAILABLE | SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                metrics::counter!("ticket_store_contention_total").increment(1);
                StoreError::Contention(db.message().to_string())
            }
            _ => StoreError::Unavailable(error.to_string()),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Corrupt(error.to_string())
        }
        _ => StoreError::Unavailable(error.to_string()),
    }
}
