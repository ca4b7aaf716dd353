//! Audit event data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::auth::AccountId;
use crate::db::{PageRequest, Pagination};
use crate::device::DeviceId;
use crate::risk::{RiskAssessment, RiskStatus};

/// Audit event ID type
pub type AuditEventId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailed,
    LoginBlocked,
    DeviceRejected,
    SessionClosed,
    AccountLocked,
    AccountUnlocked,
    LockRequested,
    LockRequestRejected,
    DeviceRegistered,
    DeviceApproved,
    DeviceRevoked,
    DeviceInactive,
    DeviceReactivated,
    DeviceDisabled,
    DeviceSessionsRevoked,
    HeartbeatReplay,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 17] = [
        AuditEventType::LoginSuccess,
        AuditEventType::LoginFailed,
        AuditEventType::LoginBlocked,
        AuditEventType::DeviceRejected,
        AuditEventType::SessionClosed,
        AuditEventType::AccountLocked,
        AuditEventType::AccountUnlocked,
        AuditEventType::LockRequested,
        AuditEventType::LockRequestRejected,
        AuditEventType::DeviceRegistered,
        AuditEventType::DeviceApproved,
        AuditEventType::DeviceRevoked,
        AuditEventType::DeviceInactive,
        AuditEventType::DeviceReactivated,
        AuditEventType::DeviceDisabled,
        AuditEventType::DeviceSessionsRevoked,
        AuditEventType::HeartbeatReplay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventType::LoginFailed => "LOGIN_FAILED",
            AuditEventType::LoginBlocked => "LOGIN_BLOCKED",
            AuditEventType::DeviceRejected => "DEVICE_REJECTED",
            AuditEventType::SessionClosed => "SESSION_CLOSED",
            AuditEventType::AccountLocked => "ACCOUNT_LOCKED",
            AuditEventType::AccountUnlocked => "ACCOUNT_UNLOCKED",
            AuditEventType::LockRequested => "LOCK_REQUESTED",
            AuditEventType::LockRequestRejected => "LOCK_REQUEST_REJECTED",
            AuditEventType::DeviceRegistered => "DEVICE_REGISTERED",
            AuditEventType::DeviceApproved => "DEVICE_APPROVED",
            AuditEventType::DeviceRevoked => "DEVICE_REVOKED",
            AuditEventType::DeviceInactive => "DEVICE_INACTIVE",
            AuditEventType::DeviceReactivated => "DEVICE_REACTIVATED",
            AuditEventType::DeviceDisabled => "DEVICE_DISABLED",
            AuditEventType::DeviceSessionsRevoked => "DEVICE_SESSIONS_REVOKED",
            AuditEventType::HeartbeatReplay => "HEARTBEAT_REPLAY",
        }
    }

    /// Events that warrant a warning-level log line
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            AuditEventType::LoginFailed
                | AuditEventType::LoginBlocked
                | AuditEventType::DeviceRejected
                | AuditEventType::AccountLocked
                | AuditEventType::DeviceRevoked
                | AuditEventType::DeviceInactive
                | AuditEventType::DeviceDisabled
                | AuditEventType::DeviceSessionsRevoked
                | AuditEventType::HeartbeatReplay
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown audit event type: {s}"))
    }
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub account_id: Option<AccountId>,
    pub device_id: Option<DeviceId>,
    pub event_type: AuditEventType,
    pub details: String,
    pub ip_address: Option<String>,
    pub risk_score: f64,
    pub status: RiskStatus,
    pub created_at: DateTime<Utc>,
}

/// Event to append
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub account_id: Option<AccountId>,
    pub device_id: Option<DeviceId>,
    pub event_type: AuditEventType,
    pub details: String,
    pub ip_address: Option<String>,
    pub risk_score: f64,
    pub status: RiskStatus,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEvent {
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            account_id: None,
            device_id: None,
            event_type,
            details: details.into(),
            ip_address: None,
            risk_score: 0.0,
            status: RiskStatus::Normal,
            created_at: Utc::now(),
        }
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn maybe_account(mut self, account_id: Option<AccountId>) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn device(mut self, device_id: Option<DeviceId>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn risk(mut self, assessment: &RiskAssessment) -> Self {
        self.risk_score = assessment.score;
        self.status = assessment.status;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Audit listing query
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub account_id: Option<AccountId>,
    pub event_type: Option<AuditEventType>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub data: Vec<AuditEvent>,
    pub pagination: Pagination,
}
