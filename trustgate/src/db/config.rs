//! Database configuration module.

use std::{env, time::Duration};

use super::timeouts::{DEFAULT_QUERY_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// Bound on a single query
    pub query_timeout: Duration,

    /// Bound on a multi-statement transaction
    pub transaction_timeout: Duration,
}

impl DatabaseConfig {
    /// Create configuration from environment variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection string (required)
    /// - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 20)
    /// - `DB_MIN_CONNECTIONS`: Minimum pool size (default: 2)
    /// - `DB_CONNECTION_TIMEOUT`: Connection timeout in seconds (default: 10)
    /// - `DB_IDLE_TIMEOUT`: Idle timeout in seconds (default: 600)
    /// - `DB_MAX_LIFETIME`: Max lifetime in seconds (default: 1800)
    /// - `DB_QUERY_TIMEOUT_MS`: Per-query bound in milliseconds (default: 5000)
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        Ok(Self {
            database_url,
            max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", 2)?,
            connection_timeout_secs: parse_env("DB_CONNECTION_TIMEOUT", 10)?,
            idle_timeout_secs: parse_env("DB_IDLE_TIMEOUT", 600)?,
            max_lifetime_secs: parse_env("DB_MAX_LIFETIME", 1800)?,
            query_timeout: Duration::from_millis(parse_env(
                "DB_QUERY_TIMEOUT_MS",
                DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
            )?),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        })
    }

    /// Local development defaults
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/trustgate".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
