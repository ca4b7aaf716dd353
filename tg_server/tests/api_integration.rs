//! Integration tests for the HTTP API.
//!
//! Drives the full router (request id, auth middleware, rate limits) over the
//! in-memory store, one `oneshot` call per request.

use axum::body::Body;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tg_server::api::{AppState, create_router};
use tg_server::config::RateLimitConfig;
use tower::ServiceExt; // For `oneshot` method
use trustgate::auth::{AuthConfig, Role};
use trustgate::db::Stores;
use trustgate::geo::GeoResolver;
use trustgate::{TrustGate, TrustGateConfig};

const PASSWORD: &str = "Passw0rdOk";

struct TestApp {
    router: axum::Router,
    gate: TrustGate,
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

/// Helper to create a server over a fresh in-memory store
fn create_test_app() -> TestApp {
    create_test_app_with_limits(RateLimitConfig {
        login_per_minute: 100,
        heartbeat_per_minute: 100,
        heartbeat_failures_per_minute: 100,
    })
}

fn create_test_app_with_limits(limits: RateLimitConfig) -> TestApp {
    let gate = TrustGate::new(
        Stores::memory(),
        GeoResolver::offline(),
        TrustGateConfig::new(AuthConfig::new(
            "test_secret_key_for_testing_only_0123456789",
            "test_pepper_for_testing_only",
        )),
    );
    let router = create_router(AppState::new(gate.clone(), None, limits));
    TestApp { router, gate }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn register(&self, username: &str) -> i64 {
        let res = self
            .send(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({"username": username, "password": PASSWORD})),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED);
        res.body["id"].as_i64().unwrap()
    }

    async fn create_account(&self, username: &str, role: Role) -> i64 {
        self.gate
            .auth
            .create_account(username, PASSWORD, role)
            .await
            .unwrap()
            .id
    }

    async fn login(&self, username: &str) -> TestResponse {
        self.send(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({"username": username, "password": PASSWORD})),
        )
        .await
    }

    async fn access_token(&self, username: &str) -> String {
        let res = self.login(username).await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);
        res.body["access_token"].as_str().unwrap().to_string()
    }
}

// ============================================================================
// Health and request ids
// ============================================================================

#[tokio::test]
async fn test_health_reports_memory_store() {
    let app = create_test_app();

    let res = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["store"], "memory");
    assert!(res.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = create_test_app();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-abc-123")
        .body(Body::empty())
        .unwrap();
    let res = app.dispatch(request).await;

    assert_eq!(res.headers["x-request-id"], "req-abc-123");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = create_test_app();

    let res = app.send(Method::GET, "/api/v1/nope", None, None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Registration and login
// ============================================================================

#[tokio::test]
async fn test_register_then_login() {
    let app = create_test_app();
    app.register("alice").await;

    let res = app.login("alice").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "bearer");
    assert_eq!(res.body["role"], "user");
    assert!(res.body["access_token"].as_str().is_some());
    assert!(res.body["refresh_token"].as_str().is_some());
    assert_eq!(res.body["risk"]["status"], "normal");
}

#[tokio::test]
async fn test_register_hides_credential_hash() {
    let app = create_test_app();

    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({"username": "bob", "password": PASSWORD})),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["username"], "bob");
    assert!(res.body.get("credential_hash").is_none());
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = create_test_app();
    app.register("carol").await;

    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({"username": "carol", "password": PASSWORD})),
        )
        .await;
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert_eq!(res.body["error"], "conflict");
}

#[tokio::test]
async fn test_weak_password_rejected() {
    let app = create_test_app();

    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({"username": "dave", "password": "short"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "validation_error");
}

#[tokio::test]
async fn test_bad_credentials_share_one_message() {
    let app = create_test_app();
    app.register("erin").await;

    let wrong_password = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({"username": "erin", "password": "Wr0ngPassword"})),
        )
        .await;
    let unknown_user = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({"username": "nobody", "password": PASSWORD})),
        )
        .await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body["error"], "unauthorized");
    assert_eq!(wrong_password.body["message"], unknown_user.body["message"]);
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = create_test_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.dispatch(request).await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "validation_error");
}

#[tokio::test]
async fn test_login_rate_limit() {
    let app = create_test_app_with_limits(RateLimitConfig {
        login_per_minute: 2,
        heartbeat_per_minute: 50,
        heartbeat_failures_per_minute: 10,
    });
    app.register("frank").await;

    assert_eq!(app.login("frank").await.status, StatusCode::OK);
    assert_eq!(app.login("frank").await.status, StatusCode::OK);

    let res = app.login("frank").await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.body["error"], "rate_limited");
}

#[tokio::test]
async fn test_login_with_pending_device_raises_risk() {
    let app = create_test_app();
    app.register("grace").await;

    let res = app
        .send(
            Method::POST,
            "/api/v1/agent/register",
            None,
            Some(json!({"device_uuid": "agent-grace-01", "hostname": "ws-17"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["status"], "pending");

    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({
                "username": "grace",
                "password": PASSWORD,
                "device_uuid": "agent-grace-01"
            })),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["risk"]["score"].as_f64().unwrap() > 0.0);
    assert_ne!(res.body["risk"]["status"], "normal");
}

// ============================================================================
// Tokens and sessions
// ============================================================================

#[tokio::test]
async fn test_refresh_issues_new_pair() {
    let app = create_test_app();
    app.register("heidi").await;
    let login = app.login("heidi").await;

    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({"refresh_token": login.body["refresh_token"]})),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "bearer");

    // An access token is not a refresh token
    let res = app
        .send(
            Method::POST,
            "/api/v1/auth/refresh",
            None,
            Some(json!({"refresh_token": login.body["access_token"]})),
        )
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = create_test_app();
    app.register("ivan").await;
    let token = app.access_token("ivan").await;

    let res = app
        .send(Method::POST, "/api/v1/auth/logout", Some(&token), None)
        .await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);

    let res = app
        .send(Method::POST, "/api/v1/auth/logout", Some(&token), None)
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = create_test_app();

    let res = app.send(Method::GET, "/api/v1/admin/audit", None, None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .send(Method::GET, "/api/v1/admin/audit", Some("garbage"), None)
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_token_forbidden_on_admin_routes() {
    let app = create_test_app();
    app.register("judy").await;
    let token = app.access_token("judy").await;

    for uri in [
        "/api/v1/admin/audit",
        "/api/v1/admin/logins",
        "/api/v1/admin/devices",
        "/api/v1/admin/requests/pending",
    ] {
        let res = app.send(Method::GET, uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(res.body["error"], "forbidden");
    }
}

// ============================================================================
// Lockdown workflow
// ============================================================================

#[tokio::test]
async fn test_superadmin_lock_is_immediate() {
    let app = create_test_app();
    let user_id = app.register("mallory").await;
    let user_token = app.access_token("mallory").await;
    app.create_account("root", Role::Superadmin).await;
    let root_token = app.access_token("root").await;

    let res = app
        .send(
            Method::POST,
            &format!("/api/v1/admin/accounts/{user_id}/lockdown"),
            Some(&root_token),
            Some(json!({"action": "lock"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["state"], "executed");
    assert_eq!(res.body["sessions_closed"], 1);

    // Sessions were closed with the lock
    let res = app
        .send(Method::POST, "/api/v1/auth/logout", Some(&user_token), None)
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app.login("mallory").await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert!(res.body["message"].as_str().unwrap().contains("locked"));
}

#[tokio::test]
async fn test_admin_lock_goes_through_review() {
    let app = create_test_app();
    let user_id = app.register("oscar").await;
    app.create_account("helpdesk", Role::Admin).await;
    app.create_account("root", Role::Superadmin).await;
    let admin_token = app.access_token("helpdesk").await;
    let root_token = app.access_token("root").await;
    let uri = format!("/api/v1/admin/accounts/{user_id}/lockdown");

    let res = app
        .send(
            Method::POST,
            &uri,
            Some(&admin_token),
            Some(json!({"action": "lock"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "validation_error");

    let res = app
        .send(
            Method::POST,
            &uri,
            Some(&admin_token),
            Some(json!({"action": "lock", "reason": "credential phishing"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["state"], "pending");
    assert!(res.body.get("sessions_closed").is_none());
    let request_id = res.body["request_id"].as_i64().unwrap();

    // Still able to log in while the request waits
    assert_eq!(app.login("oscar").await.status, StatusCode::OK);

    // Admins cannot review
    let review_uri = format!("/api/v1/admin/requests/{request_id}/review");
    let res = app
        .send(
            Method::POST,
            &review_uri,
            Some(&admin_token),
            Some(json!({"action": "approve"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = app
        .send(
            Method::GET,
            "/api/v1/admin/requests/pending",
            Some(&root_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"].as_array().unwrap().len(), 1);

    let res = app
        .send(
            Method::POST,
            &review_uri,
            Some(&root_token),
            Some(json!({"action": "approve", "comment": "confirmed"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["state"], "executed");

    assert_eq!(app.login("oscar").await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_lockdown_of_unknown_account_is_not_found() {
    let app = create_test_app();
    app.create_account("root", Role::Superadmin).await;
    let root_token = app.access_token("root").await;

    let res = app
        .send(
            Method::POST,
            "/api/v1/admin/accounts/9999/lockdown",
            Some(&root_token),
            Some(json!({"action": "lock"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["error"], "not_found");
}

// ============================================================================
// Activity views
// ============================================================================

#[tokio::test]
async fn test_login_history_and_audit_for_admins() {
    let app = create_test_app();
    app.register("peggy").await;
    app.login("peggy").await;
    app.create_account("helpdesk", Role::Admin).await;
    let admin_token = app.access_token("helpdesk").await;

    let res = app
        .send(
            Method::GET,
            "/api/v1/admin/logins?status=normal",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["summary"]["total_logins"], 2);
    assert_eq!(res.body["pagination"]["page"], 1);

    let res = app
        .send(
            Method::GET,
            "/api/v1/admin/logins?status=dangerous",
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "validation_error");

    let res = app
        .send(Method::GET, "/api/v1/admin/audit", Some(&admin_token), None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(!res.body["data"].as_array().unwrap().is_empty());
}

// ============================================================================
// Device agent
// ============================================================================

async fn register_agent(app: &TestApp, uuid: &str) -> (i64, String) {
    let res = app
        .send(
            Method::POST,
            "/api/v1/agent/register",
            None,
            Some(json!({"device_uuid": uuid, "hostname": "ws-01", "os_version": "Linux 6.8"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
    (
        res.body["device_id"].as_i64().unwrap(),
        res.body["secret_token"].as_str().unwrap().to_string(),
    )
}

async fn heartbeat(app: &TestApp, uuid: &str, token: Option<&str>) -> TestResponse {
    app.send(
        Method::POST,
        "/api/v1/agent/heartbeat",
        token,
        Some(json!({"device_uuid": uuid, "metrics": {"cpu_percent": 12.5}})),
    )
    .await
}

#[tokio::test]
async fn test_heartbeat_authentication() {
    let app = create_test_app();
    let (device_id, secret) = register_agent(&app, "agent-hb-0001").await;

    let res = heartbeat(&app, "agent-hb-0001", Some(&secret)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["device_id"], device_id);

    let res = heartbeat(&app, "agent-hb-0001", None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = heartbeat(&app, "agent-hb-0001", Some("not-the-secret")).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = heartbeat(&app, "agent-unknown-9", Some(&secret)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_revoked_device_is_refused() {
    let app = create_test_app();
    app.create_account("root", Role::Superadmin).await;
    let root_token = app.access_token("root").await;
    let (device_id, secret) = register_agent(&app, "agent-rv-0001").await;

    let res = app
        .send(
            Method::POST,
            &format!("/api/v1/admin/devices/{device_id}/revoke"),
            Some(&root_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "revoked");

    let res = heartbeat(&app, "agent-rv-0001", Some(&secret)).await;
    assert_eq!(res.status, StatusCode::CONFLICT);

    // Re-registration cannot revive a revoked device
    let res = app
        .send(
            Method::POST,
            "/api/v1/agent/register",
            None,
            Some(json!({"device_uuid": "agent-rv-0001"})),
        )
        .await;
    assert_eq!(res.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_approve_device_and_list() {
    let app = create_test_app();
    app.create_account("helpdesk", Role::Admin).await;
    let admin_token = app.access_token("helpdesk").await;
    let (device_id, _) = register_agent(&app, "agent-ap-0001").await;

    let res = app
        .send(
            Method::POST,
            &format!("/api/v1/admin/devices/{device_id}/approve"),
            Some(&admin_token),
            None,
        )
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "active");

    let res = app
        .send(Method::GET, "/api/v1/admin/devices", Some(&admin_token), None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["pagination"]["total"], 1);
}

#[tokio::test]
async fn test_heartbeat_rate_limit_per_device() {
    let app = create_test_app_with_limits(RateLimitConfig {
        login_per_minute: 10,
        heartbeat_per_minute: 1,
        heartbeat_failures_per_minute: 10,
    });
    let (_, secret) = register_agent(&app, "agent-rl-0001").await;
    let (_, other_secret) = register_agent(&app, "agent-rl-0002").await;

    assert_eq!(
        heartbeat(&app, "agent-rl-0001", Some(&secret)).await.status,
        StatusCode::OK
    );
    let res = heartbeat(&app, "agent-rl-0001", Some(&secret)).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);

    // Budgets are per device
    assert_eq!(
        heartbeat(&app, "agent-rl-0002", Some(&other_secret)).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_forged_tokens_do_not_spend_device_budget() {
    let app = create_test_app_with_limits(RateLimitConfig {
        login_per_minute: 10,
        heartbeat_per_minute: 2,
        heartbeat_failures_per_minute: 100,
    });
    let (_, secret) = register_agent(&app, "agent-rl-0003").await;

    for attempt in 0..5 {
        let forged = format!("forged-token-{attempt}");
        let res = heartbeat(&app, "agent-rl-0003", Some(&forged)).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    assert_eq!(
        heartbeat(&app, "agent-rl-0003", Some(&secret)).await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rejected_heartbeats_are_limited_per_client() {
    let app = create_test_app_with_limits(RateLimitConfig {
        login_per_minute: 10,
        heartbeat_per_minute: 50,
        heartbeat_failures_per_minute: 2,
    });
    let (_, secret) = register_agent(&app, "agent-rl-0004").await;

    assert_eq!(
        heartbeat(&app, "agent-rl-0004", Some("guess-1")).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        heartbeat(&app, "agent-unknown-77", Some(&secret)).await.status,
        StatusCode::NOT_FOUND
    );

    let res = heartbeat(&app, "agent-rl-0004", Some("guess-2")).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.body["error"], "rate_limited");
}

#[tokio::test]
async fn test_heartbeat_replay_and_stale_timestamp() {
    let app = create_test_app();
    let (_, secret) = register_agent(&app, "agent-nc-0001").await;
    let now = Utc::now();

    let res = signed_heartbeat(&app, &secret, "n-1", now).await;
    assert_eq!(res.status, StatusCode::OK);

    let res = signed_heartbeat(&app, &secret, "n-1", now).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = signed_heartbeat(&app, &secret, "n-2", now - ChronoDuration::minutes(10)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "validation_error");

    let res = signed_heartbeat(&app, &secret, "n-2", now).await;
    assert_eq!(res.status, StatusCode::OK);
}

async fn signed_heartbeat(
    app: &TestApp,
    secret: &str,
    nonce: &str,
    sent_at: DateTime<Utc>,
) -> TestResponse {
    app.send(
        Method::POST,
        "/api/v1/agent/heartbeat",
        Some(secret),
        Some(json!({
            "device_uuid": "agent-nc-0001",
            "metrics": {"nonce": nonce, "timestamp": sent_at.to_rfc3339()},
        })),
    )
    .await
}
