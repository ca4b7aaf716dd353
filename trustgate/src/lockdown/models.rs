//! Lock request data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::auth::{Account, AccountId, Role};
use crate::db::Pagination;

/// Lock request ID type
pub type LockRequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockAction {
    Lock,
    Unlock,
}

impl LockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockAction::Lock => "lock",
            LockAction::Unlock => "unlock",
        }
    }
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(LockAction::Lock),
            "unlock" => Ok(LockAction::Unlock),
            other => Err(format!("unknown lock action: {other}")),
        }
    }
}

/// Request lifecycle. `Approved` is transient: approval executes immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Executed => "executed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestState::Pending),
            "approved" => Ok(RequestState::Approved),
            "rejected" => Ok(RequestState::Rejected),
            "executed" => Ok(RequestState::Executed),
            other => Err(format!("unknown request state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    /// State the request lands in
    pub fn resulting_state(&self) -> RequestState {
        match self {
            ReviewDecision::Approve => RequestState::Executed,
            ReviewDecision::Reject => RequestState::Rejected,
        }
    }
}

/// Administrative lock/unlock request. `requested_by_*` are `None` for
/// lockouts initiated by the system (failed-attempt policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub id: LockRequestId,
    pub target_account_id: AccountId,
    pub action: LockAction,
    pub requested_by_account_id: Option<AccountId>,
    pub requested_by_role: Option<Role>,
    pub reason: Option<String>,
    pub state: RequestState,
    pub reviewed_by_account_id: Option<AccountId>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields for a new request row
#[derive(Debug, Clone)]
pub struct NewLockRequest {
    pub target_account_id: AccountId,
    pub action: LockAction,
    pub requested_by_account_id: Option<AccountId>,
    pub requested_by_role: Option<Role>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request after its effect (if any) was applied
#[derive(Debug, Clone)]
pub struct AppliedRequest {
    pub request: LockRequest,
    /// Target account after the effect; `None` for rejections
    pub account: Option<Account>,
    pub sessions_closed: u64,
}

/// Reviewer decision for a pending request
#[derive(Debug, Clone)]
pub struct Resolution {
    pub decision: ReviewDecision,
    pub reviewer_id: AccountId,
    pub comment: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// One page of pending requests
#[derive(Debug, Clone, Serialize)]
pub struct LockRequestPage {
    pub data: Vec<LockRequest>,
    pub pagination: Pagination,
}
