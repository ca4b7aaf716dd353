//! # Trustgate
//!
//! Zero-trust login monitoring: every login attempt is scored in real time,
//! every agent-registered device carries a trust state, and account lock and
//! unlock actions pass through a two-tier approval workflow.
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! - **GeoContext resolver** ([`geo`]): IP address and optional browser
//!   coordinates into a normalized location
//! - **Risk engine** ([`risk`]): pure scoring of an attempt against the
//!   account's history, the presented device and the location
//! - **Device trust registry** ([`device`]): `pending -> active <-> inactive`,
//!   any state `-> revoked`
//! - **Session registry** ([`session`]): one row per login decision with its
//!   assessment
//! - **Lockdown workflow** ([`lockdown`]): role-gated lock/unlock with
//!   superadmin review
//! - **Audit sink** ([`audit`]): append-only record of all of the above
//!
//! [`auth`] ties them together on the login path and [`db`] holds the
//! PostgreSQL and in-memory stores behind repository traits.
//!
//! ## Example
//!
//! ```no_run
//! use trustgate::{TrustGate, TrustGateConfig, auth::AuthConfig, db::Stores, geo::GeoResolver};
//!
//! let gate = TrustGate::new(
//!     Stores::memory(),
//!     GeoResolver::offline(),
//!     TrustGateConfig::new(AuthConfig::new(
//!         "a-jwt-secret-of-at-least-32-characters",
//!         "pepper-pepper-pepper",
//!     )),
//! );
//! let _sweep = gate.devices.clone().spawn_staleness_sweep(|_| {});
//! ```

pub mod audit;
pub mod auth;
pub mod db;
pub mod device;
pub mod error;
pub mod geo;
pub mod lockdown;
pub mod risk;
pub mod session;

mod services;

pub use error::{DegradedSignal, ErrorKind};
pub use services::{TrustGate, TrustGateConfig};
