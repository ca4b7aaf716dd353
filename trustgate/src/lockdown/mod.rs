//! Account lockdown workflow.
//!
//! Role capabilities come from the [`RolePolicy`] table. Superadmins lock and
//! unlock directly; admins file requests that a superadmin must review.
//! Approval is execution: an approved request moves straight to `executed`
//! with its effect applied in the same store operation.

pub mod errors;
pub mod models;
pub mod policy;
pub mod workflow;

pub use errors::{LockdownError, LockdownResult};
pub use models::{
    AppliedRequest, LockAction, LockRequest, LockRequestId, LockRequestPage, NewLockRequest,
    RequestState, Resolution, ReviewDecision,
};
pub use policy::RolePolicy;
pub use workflow::{LockdownWorkflow, Submission};
