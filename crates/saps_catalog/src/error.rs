//! Error types for the catalog layer.

use std::time::Duration;
use thiserror::Error;

/// Catalog operation result type.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Catalog errors.
///
/// Only [`CatalogError::is_transient`] errors are retried by the
/// [`RetryExecutor`](crate::retry::RetryExecutor).
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Missing or malformed input for a new record
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad argument to an update (unknown phase, empty field)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task already claimed or no longer in a claimable state
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Statement exceeded the configured query timeout
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Stored value does not map onto the domain model
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn lock_contention(msg: impl Into<String>) -> Self {
        Self::LockContention(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Connectivity and timeout failures of the backing store.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Io(_) => true,
            Self::Sqlx(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().as_deref().is_some_and(is_busy_or_locked),
        _ => false,
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including every extended code
/// (the primary code is the low byte).
fn is_busy_or_locked(code: &str) -> bool {
    code.parse::<i64>()
        .map(|code| matches!(code & 0xff, 5 | 6))
        .unwrap_or(false)
}
