//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration as ChronoDuration;
use std::{net::SocketAddr, str::FromStr, time::Duration};
use trustgate::{
    TrustGateConfig,
    auth::AuthConfig,
    db::{DatabaseConfig, timeouts::DEFAULT_TRANSACTION_TIMEOUT},
    device::DeviceTrustConfig,
    geo::{DEFAULT_LOOKUP_TIMEOUT, DEFAULT_LOOKUP_URL},
    risk::{RiskConfig, RiskWeights},
};

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Where accounts, devices and sessions live
    pub store: StoreBackend,
    /// Security configuration
    pub security: SecurityConfig,
    /// Risk engine weights and thresholds
    pub risk: RiskConfig,
    /// Automatic account lockout
    pub lockout: LockoutConfig,
    /// Device trust tunables
    pub devices: DeviceTrustConfig,
    /// IP geolocation lookups
    pub geo: GeoConfig,
    /// Per-client request limits
    pub rate_limits: RateLimitConfig,
    /// First superadmin, created when absent
    pub bootstrap: Option<BootstrapAdmin>,
    /// Prometheus exporter address
    pub metrics_bind: Option<SocketAddr>,
}

/// Storage backend selection
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Postgres(DatabaseConfig),
    /// Process-local store; everything is lost on shutdown
    Memory,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (required)
    pub password_pepper: String,
    pub access_token_ttl: ChronoDuration,
    pub refresh_token_ttl: ChronoDuration,
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutConfig {
    /// Consecutive failures that lock an account; 0 disables
    pub auto_lock_failed_attempts: u32,
    pub auto_lock_on_critical: bool,
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub enabled: bool,
    /// Lookup URL with an `{ip}` placeholder
    pub lookup_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Login attempts per client IP per minute
    pub login_per_minute: usize,
    /// Heartbeats per device token per minute
    pub heartbeat_per_minute: usize,
    /// Rejected heartbeats (bad token, unknown device) per client IP per minute
    pub heartbeat_failures_per_minute: usize,
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

/// Values given on the command line, taking precedence over the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub database_url: Option<String>,
    pub memory: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        Self::from_source(overrides, |key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_source<F>(overrides: Overrides, source: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Source(source);

        let bind = match overrides.bind {
            Some(bind) => bind,
            None => env.parse_or("SERVER_BIND", default_bind())?,
        };

        let memory = overrides.memory
            || env
                .get("STORE_BACKEND")
                .is_some_and(|v| v.eq_ignore_ascii_case("memory"));

        let store = if memory {
            StoreBackend::Memory
        } else {
            let database_url = overrides
                .database_url
                .or_else(|| env.get("DATABASE_URL"))
                .ok_or_else(|| ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "Pass --db-url, or --memory for a throwaway in-memory store".to_string(),
                })?;

            StoreBackend::Postgres(DatabaseConfig {
                database_url,
                max_connections: env.parse_or("DB_MAX_CONNECTIONS", 20)?,
                min_connections: env.parse_or("DB_MIN_CONNECTIONS", 2)?,
                connection_timeout_secs: env.parse_or("DB_CONNECTION_TIMEOUT", 10)?,
                idle_timeout_secs: env.parse_or("DB_IDLE_TIMEOUT", 600)?,
                max_lifetime_secs: env.parse_or("DB_MAX_LIFETIME", 1800)?,
                query_timeout: Duration::from_millis(env.parse_or("DB_QUERY_TIMEOUT_MS", 5000)?),
                transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            })
        };

        // Security configuration (REQUIRED)
        let jwt_secret = env.get("JWT_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let password_pepper =
            env.get("PASSWORD_PEPPER")
                .ok_or_else(|| ConfigError::MissingRequired {
                    var: "PASSWORD_PEPPER".to_string(),
                    hint: "Generate with: openssl rand -hex 16".to_string(),
                })?;

        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if password_pepper.len() < 16 {
            return Err(ConfigError::Invalid {
                var: "PASSWORD_PEPPER".to_string(),
                reason: "Must be at least 16 characters (64-bit security)".to_string(),
            });
        }

        let security = SecurityConfig {
            jwt_secret,
            password_pepper,
            access_token_ttl: ChronoDuration::minutes(env.parse_or("ACCESS_TOKEN_MINUTES", 15)?),
            refresh_token_ttl: ChronoDuration::days(env.parse_or("REFRESH_TOKEN_DAYS", 7)?),
        };

        let defaults = RiskConfig::default();
        let weights = RiskWeights {
            untrusted_device: env.parse_or(
                "RISK_WEIGHT_UNTRUSTED_DEVICE",
                defaults.weights.untrusted_device,
            )?,
            country_mismatch: env.parse_or(
                "RISK_WEIGHT_COUNTRY_MISMATCH",
                defaults.weights.country_mismatch,
            )?,
            impossible_travel: env.parse_or(
                "RISK_WEIGHT_IMPOSSIBLE_TRAVEL",
                defaults.weights.impossible_travel,
            )?,
            failed_burst: env.parse_or("RISK_WEIGHT_FAILED_BURST", defaults.weights.failed_burst)?,
            unknown_geo: env.parse_or("RISK_WEIGHT_UNKNOWN_GEO", defaults.weights.unknown_geo)?,
        };
        let risk = RiskConfig {
            weights,
            failed_window: ChronoDuration::minutes(
                env.parse_or("RISK_FAILED_WINDOW_MINUTES", defaults.failed_window.num_minutes())?,
            ),
            failed_burst_threshold: env.parse_or(
                "RISK_FAILED_BURST_THRESHOLD",
                defaults.failed_burst_threshold,
            )?,
            max_travel_speed_kmh: env.parse_or("RISK_MAX_TRAVEL_KMH", defaults.max_travel_speed_kmh)?,
            min_travel_distance_km: defaults.min_travel_distance_km,
            min_device_trust: env.parse_or("RISK_MIN_DEVICE_TRUST", defaults.min_device_trust)?,
        };

        let lockout = LockoutConfig {
            auto_lock_failed_attempts: env.parse_or("AUTO_LOCK_FAILED_ATTEMPTS", 5)?,
            auto_lock_on_critical: env.parse_or("AUTO_LOCK_ON_CRITICAL", false)?,
        };

        let device_defaults = DeviceTrustConfig::default();
        let devices = DeviceTrustConfig {
            staleness_threshold: ChronoDuration::seconds(env.parse_or(
                "DEVICE_STALE_SECS",
                device_defaults.staleness_threshold.num_seconds(),
            )?),
            sweep_interval: Duration::from_secs(env.parse_or(
                "DEVICE_SWEEP_INTERVAL_SECS",
                device_defaults.sweep_interval.as_secs(),
            )?),
            heartbeat_interval: Duration::from_secs(env.parse_or(
                "AGENT_HEARTBEAT_INTERVAL_SECS",
                device_defaults.heartbeat_interval.as_secs(),
            )?),
            max_heartbeat_age: ChronoDuration::seconds(env.parse_or(
                "HEARTBEAT_MAX_AGE_SECS",
                device_defaults.max_heartbeat_age.num_seconds(),
            )?),
            disable_below_trust: env
                .parse_or("DEVICE_DISABLE_TRUST", device_defaults.disable_below_trust)?,
            // Sessions end where logins start counting the device as untrusted
            min_session_trust: risk.min_device_trust,
            ..device_defaults
        };

        let geo = GeoConfig {
            enabled: env.parse_or("GEO_LOOKUP_ENABLED", true)?,
            lookup_url: env
                .get("GEO_LOOKUP_URL")
                .unwrap_or_else(|| DEFAULT_LOOKUP_URL.to_string()),
            timeout: Duration::from_millis(env.parse_or(
                "GEO_LOOKUP_TIMEOUT_MS",
                DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64,
            )?),
        };

        let rate_limits = RateLimitConfig {
            login_per_minute: env.parse_or("RATE_LIMIT_LOGIN_PER_MINUTE", 10)?,
            heartbeat_per_minute: env.parse_or("RATE_LIMIT_HEARTBEAT_PER_MINUTE", 50)?,
            heartbeat_failures_per_minute: env
                .parse_or("RATE_LIMIT_HEARTBEAT_FAILURES_PER_MINUTE", 10)?,
        };

        let bootstrap = match (
            env.get("BOOTSTRAP_SUPERADMIN_USERNAME"),
            env.get("BOOTSTRAP_SUPERADMIN_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(BootstrapAdmin { username, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "BOOTSTRAP_SUPERADMIN_USERNAME".to_string(),
                    reason: "Username and password must be set together".to_string(),
                });
            }
        };

        let metrics_bind = match env.get("METRICS_BIND") {
            Some(raw) => Some(parse_value("METRICS_BIND", &raw)?),
            None => None,
        };

        Ok(ServerConfig {
            bind,
            store,
            security,
            risk,
            lockout,
            devices,
            geo,
            rate_limits,
            bootstrap,
            metrics_bind,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk.validate().map_err(|reason| ConfigError::Invalid {
            var: "RISK_*".to_string(),
            reason,
        })?;

        self.devices.validate().map_err(|reason| ConfigError::Invalid {
            var: "DEVICE_*".to_string(),
            reason,
        })?;

        if self.security.access_token_ttl <= ChronoDuration::zero() {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_MINUTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.security.refresh_token_ttl <= self.security.access_token_ttl {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_DAYS".to_string(),
                reason: "Refresh tokens must outlive access tokens".to_string(),
            });
        }

        if self.geo.enabled && self.geo.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "GEO_LOOKUP_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.geo.enabled && !self.geo.lookup_url.contains("{ip}") {
            return Err(ConfigError::Invalid {
                var: "GEO_LOOKUP_URL".to_string(),
                reason: "Must contain an {ip} placeholder".to_string(),
            });
        }

        if self.rate_limits.login_per_minute == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_LOGIN_PER_MINUTE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.rate_limits.heartbeat_per_minute == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_HEARTBEAT_PER_MINUTE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.rate_limits.heartbeat_failures_per_minute == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_HEARTBEAT_FAILURES_PER_MINUTE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if let StoreBackend::Postgres(db) = &self.store {
            if db.min_connections > db.max_connections {
                return Err(ConfigError::Invalid {
                    var: "DB_MIN_CONNECTIONS".to_string(),
                    reason: format!("Cannot exceed max connections ({})", db.max_connections),
                });
            }
        }

        Ok(())
    }

    /// Token and lockout settings for the auth manager
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            access_token_ttl: self.security.access_token_ttl,
            refresh_token_ttl: self.security.refresh_token_ttl,
            auto_lock_failed_attempts: self.lockout.auto_lock_failed_attempts,
            auto_lock_on_critical: self.lockout.auto_lock_on_critical,
            ..AuthConfig::new(
                self.security.jwt_secret.clone(),
                self.security.password_pepper.clone(),
            )
        }
    }

    /// Settings for every domain service
    pub fn trustgate_config(&self) -> TrustGateConfig {
        TrustGateConfig {
            auth: self.auth_config(),
            risk: self.risk.clone(),
            devices: self.devices.clone(),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

struct Source<F>(F);

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Parse a variable, falling back to `default` only when it is unset
    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("Cannot parse {raw:?}"),
    })
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}
