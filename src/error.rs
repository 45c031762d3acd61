//! Crate-wide error taxonomy.
//!
//! Each failure mode gets its own variant rather than a single opaque
//! string, so callers can branch on retry-vs-abandon without matching on
//! error message text.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the [`crate::store::Store`] primitives.
///
/// Deliberately split into `Transient`/`Permanent` so collectors can apply
/// a retry-vs-abandon policy without string matching on error messages.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection reset, deadlock, or serialization failure. Safe to retry
    /// with backoff.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Constraint violation or otherwise malformed write. Retrying will
    /// not help; the offending record should be dropped and logged.
    #[error("permanent storage error: {0}")]
    Permanent(String),

    /// Schema migration failed. Always fatal at start-up.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Classify a raw `sqlx::Error` into the transient/permanent split.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Transient(err.to_string())
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Transient(err.to_string()),
                _ => StoreError::Permanent(err.to_string()),
            },
            _ => StoreError::Permanent(err.to_string()),
        }
    }

    /// Whether the caller should retry this operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Total attempts (the first call plus retries) before a transient
/// storage error is given up on and the cycle is abandoned.
const MAX_STORE_ATTEMPTS: u32 = 3;

/// Run a store operation, retrying with linear backoff while it keeps
/// failing with a transient error. A permanent error, or a transient one
/// that is still failing on the last attempt, is returned as-is.
pub async fn retry_store<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_STORE_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "transient storage error, retrying");
                tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt - 1))).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Errors raised while running one collector cycle.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse feed: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("failed to decode json response: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Any non-2xx status that isn't a recognised transient condition
    /// (429/503). Abandons the cycle.
    #[error("upstream returned unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// A configuration or response shape the collector cannot make sense
    /// of (e.g. an unparseable release timestamp with no fallback left).
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}
