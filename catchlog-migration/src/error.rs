//! Migration error types.

use thiserror::Error;

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration service not ready: {0}")]
    ServiceNotReady(String),

    #[error("a migration is already running")]
    AlreadyRunning,

    #[error("storage error: {0}")]
    Storage(#[from] catchlog_storage::StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] catchlog_crypto::CryptoError),

    #[error("nothing to retry: last run is {0}")]
    NotRetryable(crate::MigrationStatus),

    #[error("record {0} belongs to another owner")]
    ForeignRecord(String),

    #[error("migration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
