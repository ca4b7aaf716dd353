//! HTTP server for the trustgate login risk engine.
//!
//! Exposes login, token, device agent and administration endpoints over
//! axum. The binary in `main.rs` wires configuration, logging, metrics and
//! the store backend around [`api::create_router`].

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
