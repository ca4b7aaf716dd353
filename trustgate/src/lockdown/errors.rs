//! Lockdown workflow error types.

use thiserror::Error;

use super::{LockAction, LockRequestId, RequestState};
use crate::auth::{AccountId, Role};
use crate::db::StoreError;
use crate::error::ErrorKind;

/// Lockdown workflow errors
#[derive(Debug, Error)]
pub enum LockdownError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Role {0} may not perform this action")]
    Forbidden(Role),

    #[error("Role {actor} may not target {target} accounts")]
    TargetNotAllowed { actor: Role, target: Role },

    #[error("A reason is required for this request")]
    ReasonRequired,

    #[error("Cannot lock or unlock your own account")]
    SelfTarget,

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Lock request {0} not found")]
    RequestNotFound(LockRequestId),

    #[error("Account is already locked")]
    AlreadyLocked,

    #[error("Account is not locked")]
    NotLocked,

    #[error("A pending {0} request already exists for this account")]
    DuplicateRequest(LockAction),

    #[error("Request is already {0}")]
    AlreadyResolved(RequestState),
}

impl LockdownError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockdownError::Store(e) => e.kind(),
            LockdownError::Forbidden(_) | LockdownError::TargetNotAllowed { .. } => {
                ErrorKind::Forbidden
            }
            LockdownError::ReasonRequired | LockdownError::SelfTarget => {
                ErrorKind::ValidationError
            }
            LockdownError::AccountNotFound(_) | LockdownError::RequestNotFound(_) => {
                ErrorKind::NotFound
            }
            LockdownError::AlreadyLocked
            | LockdownError::NotLocked
            | LockdownError::DuplicateRequest(_)
            | LockdownError::AlreadyResolved(_) => ErrorKind::Conflict,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            LockdownError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for lockdown operations
pub type LockdownResult<T> = Result<T, LockdownError>;
