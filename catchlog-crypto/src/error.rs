//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during key derivation, encryption or decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("no encryption key is loaded")]
    NotReady,

    #[error("key is bound to {bound}, refusing to use it for records owned by {requested}")]
    OwnerMismatch { bound: String, requested: String },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
