//! Session error types.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("write operation '{operation}' attempted without an authenticated identity")]
    UnauthenticatedWrite { operation: String },

    #[error("operation '{operation}' claims owner {claimed} but active identity is {active}")]
    OwnershipMismatch {
        operation: String,
        active: String,
        claimed: String,
    },

    #[error("operation '{operation}' carries no owner")]
    MissingOwner { operation: String },

    #[error("guest write rejected: {0}")]
    GuestWriteRejected(String),

    #[error("no active session")]
    NoActiveSession,
}

impl SessionError {
    /// Ownership and authentication violations.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            SessionError::UnauthenticatedWrite { .. }
                | SessionError::OwnershipMismatch { .. }
                | SessionError::MissingOwner { .. }
                | SessionError::GuestWriteRejected(_)
        )
    }
}
