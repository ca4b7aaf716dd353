//! Endpoints used by the installed device agent.
//!
//! Registration is unauthenticated and hands out the device secret exactly
//! once; heartbeats authenticate with that secret as a bearer token.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use trustgate::{
    ErrorKind,
    device::{
        DeviceError, DeviceId, DeviceStatus, HeartbeatAck, HeartbeatTelemetry, RegisterDevice,
        token::hash_token,
    },
};

use super::{
    AppState,
    error::{ApiError, ApiResult},
    middleware::{ClientIp, bearer_token},
};
use crate::{logging, metrics};

#[derive(Debug, Serialize)]
pub struct AgentRegistration {
    pub device_id: DeviceId,
    pub secret_token: String,
    pub status: DeviceStatus,
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    pub device_uuid: String,
    #[serde(default)]
    pub metrics: HeartbeatTelemetry,
}

/// Register (or re-register) a device.
///
/// A known uuid gets a rotated secret; a revoked one is refused with `409`.
/// New devices start `pending` until an admin approves them.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterDevice>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AgentRegistration>)> {
    let Json(request) = payload?;
    let registration = state.gate.devices.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(AgentRegistration {
            device_id: registration.device.id,
            secret_token: registration.secret_token,
            status: registration.device.status,
            heartbeat_interval_secs: state.gate.devices.config().heartbeat_interval.as_secs(),
        }),
    ))
}

/// Accept a heartbeat with telemetry.
///
/// The per-device budget is keyed by the presented token, so requests with
/// forged tokens never spend the real agent's budget. Rejected heartbeats
/// count against the caller's IP instead.
///
/// # Errors
///
/// - `400 validation_error`: heartbeat timestamp too old
/// - `401 unauthorized`: missing or wrong secret token
/// - `403 forbidden`: nonce already used
/// - `404 not_found`: unknown device uuid
/// - `409 conflict`: device revoked
/// - `429 rate_limited`: over the per-device budget, or too many rejected
///   heartbeats from this IP
pub async fn heartbeat(
    State(state): State<AppState>,
    client: ClientIp,
    headers: HeaderMap,
    payload: Result<Json<HeartbeatPayload>, JsonRejection>,
) -> ApiResult<Json<HeartbeatAck>> {
    let client_key = client.key();
    if state.limits.heartbeat_failures.is_exhausted(&client_key) {
        metrics::rate_limit_hits_total("heartbeat_failures");
        return Err(ApiError::rate_limited());
    }

    let Some(token) = bearer_token(&headers) else {
        metrics::device_heartbeats_total("unauthorized");
        state.limits.heartbeat_failures.record(&client_key);
        return Err(ApiError::unauthorized("Missing device token"));
    };

    let Json(payload) = payload?;

    if !state.limits.heartbeat.check(&hash_token(token)) {
        metrics::rate_limit_hits_total("heartbeat");
        return Err(ApiError::rate_limited());
    }

    match state
        .gate
        .devices
        .heartbeat(&payload.device_uuid, token, payload.metrics)
        .await
    {
        Ok(ack) => {
            metrics::device_heartbeats_total("accepted");
            Ok(Json(ack))
        }
        Err(e) => {
            metrics::device_heartbeats_total(heartbeat_failure_label(&e));
            if matches!(e.kind(), ErrorKind::Unauthorized | ErrorKind::NotFound) {
                state.limits.heartbeat_failures.record(&client_key);
            }
            if matches!(
                e,
                DeviceError::InvalidToken
                    | DeviceError::DeviceRevoked
                    | DeviceError::ReplayDetected
            ) {
                logging::log_security_event(
                    "device_heartbeat_rejected",
                    None,
                    Some(&client_key),
                    &format!("Heartbeat for {} refused: {}", payload.device_uuid, e),
                );
            }
            Err(e.into())
        }
    }
}

fn heartbeat_failure_label(error: &DeviceError) -> &'static str {
    match error.kind() {
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Conflict => "revoked",
        ErrorKind::Forbidden => "replay",
        ErrorKind::ValidationError => "invalid",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_payload_defaults_metrics() {
        let payload: HeartbeatPayload =
            serde_json::from_str(r#"{"device_uuid": "agent-0001"}"#).unwrap();
        assert_eq!(payload.device_uuid, "agent-0001");
        assert!(payload.metrics.usb_events.is_empty());
        assert!(payload.metrics.cpu_percent.is_none());
        assert!(payload.metrics.nonce.is_none());
    }

    #[test]
    fn test_failure_labels() {
        assert_eq!(heartbeat_failure_label(&DeviceError::InvalidToken), "unauthorized");
        assert_eq!(heartbeat_failure_label(&DeviceError::NotRegistered), "not_found");
        assert_eq!(heartbeat_failure_label(&DeviceError::DeviceRevoked), "revoked");
        assert_eq!(heartbeat_failure_label(&DeviceError::ReplayDetected), "replay");
        assert_eq!(heartbeat_failure_label(&DeviceError::StaleHeartbeat(90)), "invalid");
    }
}
