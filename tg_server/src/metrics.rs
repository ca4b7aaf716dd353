//! Prometheus metrics for the login risk and device trust services.
//!
//! Metrics are recorded through the `metrics` facade; they are only exported
//! when [`init_metrics`] installed the Prometheus recorder (`METRICS_BIND`).
//! Without a recorder every call is a no-op.
//!
//! ```rust,no_run
//! use tg_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::login_attempts_total("success");
//! metrics::login_risk_status_total("suspicious");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

/// Increment rate limit hits counter.
pub fn rate_limit_hits_total(endpoint: &str) {
    metrics::counter!("rate_limit_hits_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

// ============================================================================
// Login Metrics
// ============================================================================

/// Increment login attempts counter, labelled by outcome
/// (`success`, `invalid_credentials`, `locked`, `device_rejected`, `error`).
pub fn login_attempts_total(outcome: &str) {
    metrics::counter!("login_attempts_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Increment the risk classification counter for a successful login.
pub fn login_risk_status_total(status: &str) {
    metrics::counter!("login_risk_status_total",
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Lockdown Metrics
// ============================================================================

/// Increment lock request counter, labelled by the state it reached.
pub fn lock_requests_total(state: &str) {
    metrics::counter!("lock_requests_total",
        "state" => state.to_string()
    )
    .increment(1);
}

// ============================================================================
// Device Metrics
// ============================================================================

/// Increment heartbeat counter (`accepted`, `unauthorized`, `not_found`, `revoked`, ...).
pub fn device_heartbeats_total(result: &str) {
    metrics::counter!("device_heartbeats_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// Add devices the staleness sweep marked inactive.
pub fn devices_marked_inactive_total(count: usize) {
    metrics::counter!("devices_marked_inactive_total").increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        rate_limit_hits_total("login");
        login_attempts_total("success");
        login_risk_status_total("normal");
        lock_requests_total("pending");
        device_heartbeats_total("accepted");
        devices_marked_inactive_total(3);
    }
}
