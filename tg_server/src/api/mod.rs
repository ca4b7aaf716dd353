//! HTTP API for the trustgate services.
//!
//! # Endpoints Overview
//!
//! All versioned routes live under `/api/v1`.
//!
//! ## Public
//! - `POST /auth/register` - Register a `user` account
//! - `POST /auth/login` - Risk-assessed login (rate limited per IP)
//! - `POST /auth/refresh` - New token pair for a still-active session
//! - `POST /agent/register` - Device agent registration
//! - `POST /agent/heartbeat` - Agent heartbeat, authenticated by the device secret
//!
//! ## Bearer token required
//! - `POST /auth/logout`
//! - `POST /admin/accounts/{id}/lockdown`
//! - `GET  /admin/requests/pending`
//! - `POST /admin/requests/{id}/review`
//! - `GET  /admin/logins`
//! - `POST /admin/sessions/{id}/close`
//! - `GET  /admin/devices`, `POST /admin/devices/{id}/approve`,
//!   `POST /admin/devices/{id}/revoke`, `GET /admin/devices/{id}/telemetry`
//! - `GET  /admin/audit`
//!
//! ## Health Check
//! - `GET /health`
//!
//! Errors are JSON `{"error": <kind>, "message": <text>}`; see [`error`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use tg_server::api::{AppState, create_router};
//! use tg_server::config::RateLimitConfig;
//! use trustgate::{TrustGate, TrustGateConfig, auth::AuthConfig, db::Stores, geo::GeoResolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = TrustGate::new(
//!     Stores::memory(),
//!     GeoResolver::offline(),
//!     TrustGateConfig::new(AuthConfig::new(
//!         "a-jwt-secret-of-at-least-32-characters",
//!         "pepper-pepper-pepper",
//!     )),
//! );
//! let state = AppState::new(
//!     gate,
//!     None,
//!     RateLimitConfig {
//!         login_per_minute: 10,
//!         heartbeat_per_minute: 50,
//!         heartbeat_failures_per_minute: 10,
//!     },
//! );
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod agent;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod rate_limiter;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use trustgate::{TrustGate, db::Database};

use crate::config::RateLimitConfig;
use rate_limiter::KeyedRateLimiter;

/// Per-client request budgets
#[derive(Debug)]
pub struct RateLimits {
    /// Keyed by client IP
    pub login: KeyedRateLimiter,
    /// Keyed by the digest of the presented device token
    pub heartbeat: KeyedRateLimiter,
    /// Rejected heartbeats, keyed by client IP
    pub heartbeat_failures: KeyedRateLimiter,
}

impl RateLimits {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            login: KeyedRateLimiter::per_minute(config.login_per_minute),
            heartbeat: KeyedRateLimiter::per_minute(config.heartbeat_per_minute),
            heartbeat_failures: KeyedRateLimiter::per_minute(config.heartbeat_failures_per_minute),
        }
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gate: TrustGate,
    /// Present when running against PostgreSQL; probed by `/health`
    pub database: Option<Database>,
    pub limits: Arc<RateLimits>,
}

impl AppState {
    pub fn new(gate: TrustGate, database: Option<Database>, limits: RateLimitConfig) -> Self {
        Self {
            gate,
            database,
            limits: Arc::new(RateLimits::new(limits)),
        }
    }
}

/// Create the complete API router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create API v1 router with all versioned endpoints.
fn create_v1_router(state: AppState) -> Router<AppState> {
    // Public routes (no authentication middleware)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/agent/register", post(agent::register))
        .route("/agent/heartbeat", post(agent::heartbeat));

    // Protected routes (require a bearer access token)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/admin/accounts/{id}/lockdown", post(admin::lockdown))
        .route("/admin/requests/pending", get(admin::pending_requests))
        .route("/admin/requests/{id}/review", post(admin::review_request))
        .route("/admin/logins", get(admin::login_history))
        .route("/admin/sessions/{id}/close", post(admin::close_session))
        .route("/admin/devices", get(admin::list_devices))
        .route("/admin/devices/{id}/approve", post(admin::approve_device))
        .route("/admin/devices/{id}/revoke", post(admin::revoke_device))
        .route("/admin/devices/{id}/telemetry", get(admin::device_telemetry))
        .route("/admin/audit", get(admin::audit_events))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:8000/health
/// # {"status":"healthy","version":"0.1.0","store":"postgres","database":true,"timestamp":"..."}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store, db_healthy) = match &state.database {
        Some(db) => match db.health_check().await {
            Ok(()) => ("postgres", true),
            Err(e) => {
                tracing::error!("Database health check failed: {e}");
                ("postgres", false)
            }
        },
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
