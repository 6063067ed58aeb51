//! # Store Errors

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
///
/// Connectivity failures are separated from query failures so callers can
/// decide whether to feed the error into the reconnection machinery.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("No live connection pool")]
    NotConnected,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Record has no value for natural key column '{0}'")]
    MissingNaturalKey(String),
}

impl StoreError {
    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotConnected => "PV_STORE_NOT_CONNECTED",
            StoreError::Connection(_) => "PV_STORE_CONNECTION",
            StoreError::Timeout(_) => "PV_STORE_TIMEOUT",
            StoreError::Query(_) => "PV_STORE_QUERY",
            StoreError::InvalidIdentifier(_) => "PV_STORE_IDENTIFIER",
            StoreError::MissingNaturalKey(_) => "PV_STORE_NATURAL_KEY",
        }
    }

    /// Whether this error means the store is unreachable rather than that a
    /// single statement was rejected.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::NotConnected | StoreError::Connection(_) | StoreError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}
