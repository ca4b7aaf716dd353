//! Error taxonomy shared by every module.
//!
//! Each module keeps its own `thiserror` enum; they all collapse onto
//! [`ErrorKind`] so callers (the HTTP layer in particular) can map failures to
//! a stable machine-readable kind without matching on module internals.

use serde::Serialize;
use std::fmt;

/// Stable, machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input or a missing mandatory field
    ValidationError,
    /// Bad credentials, bad device token, invalid or expired JWT
    Unauthorized,
    /// Role insufficient for the requested action
    Forbidden,
    /// Duplicate pending request, device already revoked, state already applied
    Conflict,
    /// Unknown account, device, session or request id
    NotFound,
    /// Too many attempts from one client
    RateLimited,
    /// Storage failure or anything else the caller cannot act on
    Internal,
}

impl ErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal signal outage (geo lookup, reputation lookup).
///
/// Never surfaced to the user: the risk engine records it as an informational
/// factor and keeps scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedSignal {
    pub signal: &'static str,
    pub reason: String,
}

impl DegradedSignal {
    pub fn new(signal: &'static str, reason: impl Into<String>) -> Self {
        Self {
            signal,
            reason: reason.into(),
        }
    }

    /// Text stored in `risk_factors`
    pub fn as_factor(&self) -> String {
        format!("Degraded signal: {} unavailable ({})", self.signal, self.reason)
    }
}

impl fmt::Display for DegradedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.signal, self.reason)
    }
}
