//! Store error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A check-and-set lost the race (duplicate message id, concurrent
    /// export request).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Worth retrying with the capped backoff policy.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("permanent I/O error: {0}")]
    PermanentIo(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        // Connection-level failures recover after a reconnect; everything
        // else (type errors, script errors) will not.
        if e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped() {
            StoreError::TransientIo(e.to_string())
        } else {
            StoreError::PermanentIo(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
