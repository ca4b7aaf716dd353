//! Login session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::auth::{Account, AccountId};
use crate::db::{PageRequest, Pagination};
use crate::device::{Device, DeviceId};
use crate::error::DegradedSignal;
use crate::geo::GeoContext;
use crate::risk::{RiskAssessment, RiskStatus};

/// Login session ID type
pub type SessionId = i64;

/// How a login attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    Success,
    BadCredentials,
    DeviceRejected,
}

impl LoginOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::BadCredentials => "bad_credentials",
            LoginOutcome::DeviceRejected => "device_rejected",
        }
    }
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LoginOutcome::Success),
            "bad_credentials" => Ok(LoginOutcome::BadCredentials),
            "device_rejected" => Ok(LoginOutcome::DeviceRejected),
            other => Err(format!("unknown login outcome: {other}")),
        }
    }
}

/// One recorded login decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSession {
    pub id: SessionId,
    pub account_id: AccountId,
    pub device_id: Option<DeviceId>,
    pub ip_address: String,
    pub geo: GeoContext,
    pub risk_score: f64,
    pub status: RiskStatus,
    pub risk_factors: Vec<String>,
    pub outcome: LoginOutcome,
    pub login_at: DateTime<Utc>,
    pub logout_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Fields for a new session row
#[derive(Debug, Clone)]
pub struct NewLoginSession {
    pub account_id: AccountId,
    pub device_id: Option<DeviceId>,
    pub ip_address: String,
    pub geo: GeoContext,
    pub assessment: RiskAssessment,
    pub outcome: LoginOutcome,
    pub login_at: DateTime<Utc>,
}

impl NewLoginSession {
    pub fn is_active(&self) -> bool {
        self.outcome == LoginOutcome::Success
    }
}

/// A login attempt handed to the registry
#[derive(Debug, Clone)]
pub struct LoginAttempt<'a> {
    pub account: &'a Account,
    pub device: Option<&'a Device>,
    /// A device uuid was presented but is not registered
    pub unregistered_device: bool,
    pub ip_address: String,
    pub geo: GeoContext,
    pub degraded: Vec<DegradedSignal>,
    pub outcome: LoginOutcome,
}

/// Stored session plus the account as it stands after the attempt
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub session: LoginSession,
    pub account: Account,
}

/// Result of closing a session
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(LoginSession),
    AlreadyClosed(LoginSession),
}

impl CloseOutcome {
    pub fn session(&self) -> &LoginSession {
        match self {
            CloseOutcome::Closed(s) | CloseOutcome::AlreadyClosed(s) => s,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, CloseOutcome::Closed(_))
    }
}

/// Login history query
#[derive(Debug, Clone, Default)]
pub struct LoginHistoryFilter {
    pub status: Option<RiskStatus>,
    pub country: Option<String>,
    pub min_risk_score: Option<f64>,
    pub account_id: Option<AccountId>,
    pub page: PageRequest,
}

/// Counts behind the history summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCounts {
    pub total: u64,
    pub suspicious: u64,
    pub critical: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginSummary {
    pub total_logins: u64,
    pub suspicious_percentage: f64,
    pub critical_percentage: f64,
}

impl From<HistoryCounts> for LoginSummary {
    fn from(counts: HistoryCounts) -> Self {
        let pct = |n: u64| {
            if counts.total == 0 {
                0.0
            } else {
                ((n as f64 / counts.total as f64) * 10_000.0).round() / 100.0
            }
        };

        Self {
            total_logins: counts.total,
            suspicious_percentage: pct(counts.suspicious),
            critical_percentage: pct(counts.critical),
        }
    }
}

/// One page of login history
#[derive(Debug, Clone, Serialize)]
pub struct LoginHistoryPage {
    pub data: Vec<LoginSession>,
    pub summary: LoginSummary,
    pub pagination: Pagination,
}
