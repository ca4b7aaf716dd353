//! Session registry.
//!
//! Every login decision (successful, failed or device-rejected) becomes a
//! [`LoginSession`] row carrying its risk assessment. Only successful logins
//! are active; lock effects and logouts close them.

pub mod errors;
pub mod models;
pub mod registry;

pub use errors::{SessionError, SessionResult};
pub use models::{
    CloseOutcome, HistoryCounts, LoginAttempt, LoginHistoryFilter, LoginHistoryPage, LoginOutcome,
    LoginSession, LoginSummary, NewLoginSession, RecordedAttempt, SessionId,
};
pub use registry::SessionRegistry;
