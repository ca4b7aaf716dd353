//! Administrative endpoints: lockdown workflow, login activity, sessions,
//! devices and the audit trail.
//!
//! All routes sit behind the bearer middleware; what each role may do is
//! decided by the role policy table in `trustgate`, so a `user` token gets
//! `403 forbidden` here.

use axum::{
    Json,
    extract::{
        Extension, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use serde::{Deserialize, Serialize};
use trustgate::{
    audit::{AuditEventType, AuditFilter, AuditPage},
    auth::{AccountId, Actor, Principal},
    db::PageRequest,
    device::{Device, DeviceId, DevicePage, TelemetryPage},
    lockdown::{
        LockAction, LockRequest, LockRequestId, LockRequestPage, RequestState, ReviewDecision,
        Submission,
    },
    risk::RiskStatus,
    session::{LoginHistoryFilter, LoginHistoryPage, LoginSession, SessionId},
};

use super::{
    AppState,
    error::{ApiError, ApiResult},
};
use crate::{logging, metrics};

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct LockdownPayload {
    pub action: LockAction,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LockdownResponse {
    pub request_id: LockRequestId,
    pub state: RequestState,
    /// Sessions closed by an immediately executed lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_closed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub action: ReviewDecision,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginHistoryQuery {
    pub status: Option<String>,
    pub country: Option<String>,
    pub min_risk_score: Option<f64>,
    pub account_id: Option<AccountId>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub usb_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub account_id: Option<AccountId>,
    pub event_type: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

fn ensure_can_view_activity(actor: Actor) -> ApiResult<()> {
    if actor.role.policy().can_view_activity {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "Role {} cannot view account activity",
            actor.role
        )))
    }
}

/// Lock or unlock an account.
///
/// A superadmin's request executes immediately (`state: "executed"`); an
/// admin's request waits for superadmin review (`state: "pending"`) and needs
/// a reason.
pub async fn lockdown(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<AccountId>, PathRejection>,
    payload: Result<Json<LockdownPayload>, JsonRejection>,
) -> ApiResult<Json<LockdownResponse>> {
    let Path(target_id) = path?;
    let Json(payload) = payload?;

    let submission = state
        .gate
        .lockdown
        .submit(principal.actor, target_id, payload.action, payload.reason)
        .await?;

    let request = submission.request();
    metrics::lock_requests_total(request.state.as_str());

    let sessions_closed = match &submission {
        Submission::Executed(applied) => {
            if request.action == LockAction::Lock {
                logging::log_security_event(
                    "account_locked",
                    Some(target_id),
                    None,
                    &format!(
                        "Account locked by {} #{} ({} session(s) closed)",
                        principal.actor.role, principal.actor.account_id, applied.sessions_closed
                    ),
                );
            }
            Some(applied.sessions_closed)
        }
        Submission::Pending(_) => None,
    };

    Ok(Json(LockdownResponse {
        request_id: request.id,
        state: request.state,
        sessions_closed,
    }))
}

/// Pending lock requests, oldest first (superadmin only)
pub async fn pending_requests(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<LockRequestPage>> {
    let Query(query) = query?;
    let page = state
        .gate
        .lockdown
        .list_pending(principal.actor, query.request())
        .await?;

    Ok(Json(page))
}

/// Approve or reject a pending request (superadmin only).
///
/// A request resolves exactly once; a late reviewer gets `409 conflict`.
pub async fn review_request(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<LockRequestId>, PathRejection>,
    payload: Result<Json<ReviewPayload>, JsonRejection>,
) -> ApiResult<Json<LockRequest>> {
    let Path(request_id) = path?;
    let Json(payload) = payload?;

    let applied = state
        .gate
        .lockdown
        .review(principal.actor, request_id, payload.action, payload.comment)
        .await?;

    metrics::lock_requests_total(applied.request.state.as_str());
    if payload.action == ReviewDecision::Approve && applied.request.action == LockAction::Lock {
        logging::log_security_event(
            "account_locked",
            Some(applied.request.target_account_id),
            None,
            &format!(
                "Lock request #{} approved by superadmin #{} ({} session(s) closed)",
                applied.request.id, principal.actor.account_id, applied.sessions_closed
            ),
        );
    }

    Ok(Json(applied.request))
}

/// Login history with risk filters and a summary over the filtered set
pub async fn login_history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<LoginHistoryQuery>, QueryRejection>,
) -> ApiResult<Json<LoginHistoryPage>> {
    ensure_can_view_activity(principal.actor)?;
    let Query(query) = query?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<RiskStatus>)
        .transpose()
        .map_err(ApiError::validation)?;

    let page = state
        .gate
        .sessions
        .login_history(LoginHistoryFilter {
            status,
            country: query.country,
            min_risk_score: query.min_risk_score,
            account_id: query.account_id,
            page: PageRequest::new(query.page, query.limit),
        })
        .await?;

    Ok(Json(page))
}

/// Force-close a session. Admins may only close `user` sessions (and their own).
pub async fn close_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<SessionId>, PathRejection>,
) -> ApiResult<Json<LoginSession>> {
    let Path(session_id) = path?;
    let outcome = state
        .gate
        .sessions
        .force_close(principal.actor, session_id)
        .await?;

    Ok(Json(outcome.session().clone()))
}

/// Registered devices, newest first
pub async fn list_devices(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<DevicePage>> {
    let Query(query) = query?;
    let page = state
        .gate
        .devices
        .list(principal.actor, query.request())
        .await?;

    Ok(Json(page))
}

/// Move a pending device to active
pub async fn approve_device(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<DeviceId>, PathRejection>,
) -> ApiResult<Json<Device>> {
    let Path(device_id) = path?;
    let device = state.gate.devices.approve(principal.actor, device_id).await?;

    Ok(Json(device))
}

/// Revoke a device; its heartbeats and logins are refused from now on
pub async fn revoke_device(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<DeviceId>, PathRejection>,
) -> ApiResult<Json<Device>> {
    let Path(device_id) = path?;
    let device = state.gate.devices.revoke(principal.actor, device_id).await?;

    logging::log_security_event(
        "device_revoked",
        Some(principal.actor.account_id),
        None,
        &format!("Device {} revoked", device.device_uuid),
    );

    Ok(Json(device))
}

/// Telemetry snapshots for one device, optionally only those with USB events
pub async fn device_telemetry(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    path: Result<Path<DeviceId>, PathRejection>,
    query: Result<Query<TelemetryQuery>, QueryRejection>,
) -> ApiResult<Json<TelemetryPage>> {
    let Path(device_id) = path?;
    let Query(query) = query?;

    let page = state
        .gate
        .devices
        .telemetry(
            principal.actor,
            device_id,
            query.usb_only,
            PageRequest::new(query.page, query.limit),
        )
        .await?;

    Ok(Json(page))
}

/// Audit trail, newest first
pub async fn audit_events(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Json<AuditPage>> {
    ensure_can_view_activity(principal.actor)?;
    let Query(query) = query?;

    let event_type = query
        .event_type
        .as_deref()
        .map(str::parse::<AuditEventType>)
        .transpose()
        .map_err(ApiError::validation)?;

    let page = state
        .gate
        .audit
        .list(AuditFilter {
            account_id: query.account_id,
            event_type,
            page: PageRequest::new(query.page, query.limit),
        })
        .await?;

    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate::auth::Role;

    #[test]
    fn test_activity_gate_follows_policy() {
        let actor = |role| Actor {
            account_id: 1,
            role,
        };
        assert!(ensure_can_view_activity(actor(Role::Superadmin)).is_ok());
        assert!(ensure_can_view_activity(actor(Role::Admin)).is_ok());

        let err = ensure_can_view_activity(actor(Role::User)).unwrap_err();
        assert_eq!(err.kind, trustgate::ErrorKind::Forbidden);
    }

    #[test]
    fn test_lockdown_payload_parsing() {
        let payload: LockdownPayload =
            serde_json::from_str(r#"{"action": "lock", "reason": "phishing"}"#).unwrap();
        assert_eq!(payload.action, LockAction::Lock);
        assert_eq!(payload.reason.as_deref(), Some("phishing"));

        assert!(serde_json::from_str::<LockdownPayload>(r#"{"action": "ban"}"#).is_err());
    }

    #[test]
    fn test_review_payload_parsing() {
        let payload: ReviewPayload = serde_json::from_str(r#"{"action": "reject"}"#).unwrap();
        assert_eq!(payload.action, ReviewDecision::Reject);
        assert!(payload.comment.is_none());
    }
}
