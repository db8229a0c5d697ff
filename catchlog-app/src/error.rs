//! Error types for the identity controller.

use catchlog_crypto::CryptoError;
use catchlog_migration::MigrationError;
use catchlog_session::SessionError;
use catchlog_storage::StorageError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Errors that end the session immediately.
    pub fn is_security_violation(&self) -> bool {
        match self {
            AppError::Session(e) => e.is_security_violation(),
            AppError::Crypto(CryptoError::OwnerMismatch { .. }) => true,
            AppError::Storage(StorageError::OwnerChanged { .. }) => true,
            AppError::Migration(MigrationError::ForeignRecord(_)) => true,
            _ => false,
        }
    }
}
