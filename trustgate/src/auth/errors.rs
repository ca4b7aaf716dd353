//! Authentication error types.

use thiserror::Error;

use crate::db::StoreError;
use crate::device::DeviceError;
use crate::error::ErrorKind;
use crate::lockdown::LockdownError;
use crate::session::SessionError;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Session registry error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Device registry error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Lockdown workflow error
    #[error(transparent)]
    Lockdown(#[from] LockdownError),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Unknown user or wrong password; deliberately indistinguishable
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Account is locked
    #[error("Account is locked. Please contact an administrator")]
    AccountLocked,

    /// Presented device may not be used for this login
    #[error("Device rejected: {0}")]
    DeviceRejected(String),

    /// Username already exists
    #[error("Username already exists")]
    UsernameTaken,

    /// Invalid username format
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// JWT token error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Token of the wrong type for this operation
    #[error("Invalid token")]
    InvalidToken,

    /// Session referenced by the token is closed or gone
    #[error("Session is no longer active")]
    SessionExpired,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Store(e) => e.kind(),
            AuthError::Session(e) => e.kind(),
            AuthError::Device(e) => e.kind(),
            AuthError::Lockdown(e) => e.kind(),
            AuthError::HashingFailed => ErrorKind::Internal,
            AuthError::InvalidCredentials
            | AuthError::Jwt(_)
            | AuthError::InvalidToken
            | AuthError::SessionExpired => ErrorKind::Unauthorized,
            AuthError::AccountLocked | AuthError::DeviceRejected(_) => ErrorKind::Forbidden,
            AuthError::UsernameTaken => ErrorKind::Conflict,
            AuthError::InvalidUsername(_) | AuthError::WeakPassword(_) => {
                ErrorKind::ValidationError
            }
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Storage and JWT errors are sanitized so clients learn nothing about the
    /// internal system structure or the token layout.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Store(e) => e.client_message(),
            AuthError::Session(e) => e.client_message(),
            AuthError::Device(e) => e.client_message(),
            AuthError::Lockdown(e) => e.client_message(),
            AuthError::Jwt(_) => "Authentication failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_sanitized() {
        let err = AuthError::Store(StoreError::Corrupt("bad role column".to_string()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_nested_kinds_pass_through() {
        let err = AuthError::from(SessionError::AccountLocked);
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = AuthError::from(DeviceError::InvalidToken);
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
