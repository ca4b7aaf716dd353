//! Authentication API handlers.
//!
//! Login runs the full zero-trust path (geo resolution, device lookup, risk
//! assessment, lockout) and returns the risk verdict next to the tokens.
//!
//! ```bash
//! curl -X POST http://localhost:8000/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "alice", "password": "Passw0rd!", "device_uuid": "agent-ws-017"}'
//! ```

use axum::{
    Json,
    extract::{Extension, State, rejection::JsonRejection},
    http::StatusCode,
};
use trustgate::{
    ErrorKind,
    auth::{
        Account, AuthError, LoginRequest, LoginResult, Principal, RefreshRequest, RegisterRequest,
        TokenPair,
    },
    risk::RiskStatus,
};

use super::{
    AppState,
    error::{ApiError, ApiResult},
    middleware::ClientIp,
    request_id::RequestId,
};
use crate::{logging, metrics};

/// Authenticate a user and return tokens plus the risk assessment.
///
/// # Response
///
/// ```json
/// {
///   "access_token": "eyJ...",
///   "refresh_token": "eyJ...",
///   "token_type": "bearer",
///   "role": "user",
///   "session_id": 42,
///   "risk": {"score": 0.25, "status": "normal", "factors": ["Country mismatch: DE -> FR"]}
/// }
/// ```
///
/// # Errors
///
/// - `401 unauthorized`: unknown user or wrong password (same message for both)
/// - `403 forbidden`: account locked, or device revoked / owned by someone else
/// - `429 rate_limited`: more than the per-IP login budget in a minute
pub async fn login(
    State(state): State<AppState>,
    client: ClientIp,
    request_id: RequestId,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResult>> {
    if !state.limits.login.check(&client.key()) {
        metrics::rate_limit_hits_total("login");
        logging::log_security_event(
            "login_rate_limited",
            None,
            Some(&client.key()),
            &format!("Login rate limit exceeded (request {})", request_id.as_str()),
        );
        return Err(ApiError::rate_limited());
    }

    let Json(request) = payload?;
    let username = request.username.clone();

    match state.gate.auth.login(request, &client.login_context()).await {
        Ok(result) => {
            metrics::login_attempts_total("success");
            metrics::login_risk_status_total(result.risk.status.as_str());

            if result.risk.status != RiskStatus::Normal {
                logging::log_security_event(
                    "risky_login",
                    None,
                    Some(&client.key()),
                    &format!(
                        "{} login for {} (score {}): {}",
                        result.risk.status,
                        username,
                        result.risk.score,
                        result.risk.factors.join("; ")
                    ),
                );
            }

            Ok(Json(result))
        }
        Err(e) => {
            let outcome = login_failure_label(&e);
            metrics::login_attempts_total(outcome);

            if e.kind() != ErrorKind::Internal {
                logging::log_security_event(
                    outcome,
                    None,
                    Some(&client.key()),
                    &format!(
                        "Login for {} refused (request {}): {}",
                        username,
                        request_id.as_str(),
                        e
                    ),
                );
            }

            Err(e.into())
        }
    }
}

fn login_failure_label(error: &AuthError) -> &'static str {
    match error {
        AuthError::InvalidCredentials => "invalid_credentials",
        AuthError::AccountLocked => "locked",
        AuthError::DeviceRejected(_) => "device_rejected",
        _ => "error",
    }
}

/// Register a new `user` account.
///
/// Returns `201 Created` with the account. Usernames are 3-32 characters of
/// letters, digits, `_`, `.` and `-`; passwords need at least 8 characters
/// with an uppercase letter, a lowercase letter and a digit.
///
/// # Errors
///
/// - `400 validation_error`: invalid username or weak password
/// - `409 conflict`: username taken
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let Json(request) = payload?;
    let account = state.gate.auth.register(request).await?;

    tracing::info!(account_id = account.id, username = %account.username, "Account registered");

    Ok((StatusCode::CREATED, Json(account)))
}

/// Exchange a refresh token for a new token pair.
///
/// The session the token belongs to must still be active and the account
/// unlocked; a lockdown in between revokes the refresh token too.
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<TokenPair>> {
    let Json(request) = payload?;
    let tokens = state.gate.auth.refresh(&request.refresh_token).await?;

    Ok(Json(tokens))
}

/// Close the caller's session. Returns `204 No Content`.
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<StatusCode> {
    state.gate.auth.logout(&principal).await?;

    Ok(StatusCode::NO_CONTENT)
}
