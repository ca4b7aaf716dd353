//! Authentication: account registration, login orchestration and tokens.
//!
//! This module implements:
//! - Argon2id password hashing with server-side pepper
//! - JWT access tokens (15-minute expiry) and refresh tokens (7-day expiry),
//!   both bound to a login session
//! - The login path: geolocation, device lookup, risk scoring through the
//!   session registry, and automatic lockout
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trustgate::auth::{AuthConfig, AuthManager, AuthServices, RegisterRequest};
//! use trustgate::audit::AuditLog;
//! use trustgate::db::Stores;
//! use trustgate::device::{DeviceRegistry, DeviceTrustConfig};
//! use trustgate::geo::GeoResolver;
//! use trustgate::lockdown::LockdownWorkflow;
//! use trustgate::risk::RiskEngine;
//! use trustgate::session::SessionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stores = Stores::memory();
//!     let audit = AuditLog::new(stores.audit.clone());
//!     let services = AuthServices {
//!         accounts: stores.accounts.clone(),
//!         geo: GeoResolver::offline(),
//!         devices: Arc::new(DeviceRegistry::new(
//!             stores.devices.clone(),
//!             stores.sessions.clone(),
//!             audit.clone(),
//!             DeviceTrustConfig::default(),
//!         )),
//!         sessions: Arc::new(SessionRegistry::new(
//!             stores.accounts.clone(),
//!             stores.sessions.clone(),
//!             RiskEngine::default(),
//!             audit.clone(),
//!         )),
//!         lockdown: Arc::new(LockdownWorkflow::new(
//!             stores.accounts.clone(),
//!             stores.lock_requests.clone(),
//!             audit.clone(),
//!         )),
//!         audit,
//!     };
//!     let auth = AuthManager::new(
//!         services,
//!         AuthConfig::new("a-jwt-secret-of-at-least-32-characters", "pepper-pepper-pepper"),
//!     );
//!
//!     let account = auth
//!         .register(RegisterRequest {
//!             username: "alice".to_string(),
//!             password: "SecurePass123".to_string(),
//!         })
//!         .await?;
//!     println!("Registered account: {}", account.username);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{AuthError, AuthResult};
pub use manager::{AuthConfig, AuthManager, AuthServices};
pub use models::{
    Account, AccountId, Actor, FederatedLogin, LoginContext, LoginRequest, LoginResult, NewAccount,
    Principal, RefreshRequest, RegisterRequest, Role, TokenClaims, TokenPair, TokenType,
};
