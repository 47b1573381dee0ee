use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by query lookup, validation and execution.
///
/// Nothing here is retried: a report computed against a shifted "now" is
/// worse than a failed one.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown query: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid parameter: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),
}

impl QueryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QueryError::Validation(msg.into())
    }
}

// SQLSTATE for "relation does not exist"
const UNDEFINED_TABLE: &str = "42P01";

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNDEFINED_TABLE) => {
                QueryError::CollectionNotFound(db_err.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => QueryError::StoreUnavailable(err.to_string()),
            other => QueryError::Store(other.to_string()),
        }
    }
}
