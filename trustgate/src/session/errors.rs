//! Session registry error types.

use thiserror::Error;

use super::SessionId;
use crate::auth::AccountId;
use crate::db::StoreError;
use crate::error::ErrorKind;

/// Session registry errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    /// A success session was refused because the account is locked
    #[error("Account is locked")]
    AccountLocked,

    #[error("Insufficient role to close this session")]
    Forbidden,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Store(e) => e.kind(),
            SessionError::NotFound(_) | SessionError::AccountNotFound(_) => ErrorKind::NotFound,
            SessionError::AccountLocked | SessionError::Forbidden => ErrorKind::Forbidden,
            SessionError::InvalidFilter(_) => ErrorKind::ValidationError,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            SessionError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
