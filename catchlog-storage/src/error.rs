//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend I/O failure. Retryable.
    #[error("store operation failed: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store not ready")]
    NotReady,

    /// The layer is disabled or absent on this device.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record {record_id} is owned by {existing}, refusing write claiming {claimed}")]
    OwnerChanged {
        record_id: String,
        existing: String,
        claimed: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Store(_))
    }
}
