//! Device registry error types.

use thiserror::Error;

use super::{DeviceId, DeviceStatus};
use crate::db::StoreError;
use crate::error::ErrorKind;

/// Device registry errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid device uuid: {0}")]
    InvalidUuid(String),

    #[error("Device is not registered")]
    NotRegistered,

    #[error("Device {0} not found")]
    NotFound(DeviceId),

    #[error("Device has been revoked")]
    DeviceRevoked,

    #[error("Invalid device token")]
    InvalidToken,

    #[error("Device is {current}, expected {expected}")]
    InvalidTransition {
        current: DeviceStatus,
        expected: &'static str,
    },

    #[error("Insufficient role for device management")]
    Forbidden,

    #[error("Heartbeat nonce was already used")]
    ReplayDetected,

    #[error("Heartbeat timestamp is {0} seconds old")]
    StaleHeartbeat(i64),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Store(e) => e.kind(),
            DeviceError::InvalidUuid(_) | DeviceError::StaleHeartbeat(_) => {
                ErrorKind::ValidationError
            }
            DeviceError::NotRegistered | DeviceError::NotFound(_) => ErrorKind::NotFound,
            DeviceError::DeviceRevoked | DeviceError::InvalidTransition { .. } => {
                ErrorKind::Conflict
            }
            DeviceError::InvalidToken => ErrorKind::Unauthorized,
            DeviceError::Forbidden | DeviceError::ReplayDetected => ErrorKind::Forbidden,
        }
    }

    /// Client-safe message; storage details are never exposed
    pub fn client_message(&self) -> String {
        match self {
            DeviceError::Store(e) => e.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
