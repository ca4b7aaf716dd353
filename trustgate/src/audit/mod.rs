//! Append-only record of login decisions, device transitions and lockdowns.

pub mod models;
pub mod sink;

pub use models::{AuditEvent, AuditEventId, AuditEventType, AuditFilter, AuditPage, NewAuditEvent};
pub use sink::AuditLog;
