//! Two-tier lock/unlock approval workflow.

use chrono::Utc;
use std::sync::Arc;

use super::models::{
    AppliedRequest, LockAction, LockRequest, LockRequestId, LockRequestPage, NewLockRequest,
    RequestState, Resolution, ReviewDecision,
};
use super::{LockdownError, LockdownResult};
use crate::audit::{AuditEventType, AuditLog, NewAuditEvent};
use crate::auth::{Account, AccountId, Actor};
use crate::db::{AccountRepository, LockRequestRepository, PageRequest, Pagination, StoreError};

/// What happened to a submitted lockdown
#[derive(Debug, Clone)]
pub enum Submission {
    /// Applied immediately (superadmin)
    Executed(AppliedRequest),
    /// Waiting for superadmin review (admin)
    Pending(LockRequest),
}

impl Submission {
    pub fn request(&self) -> &LockRequest {
        match self {
            Submission::Executed(applied) => &applied.request,
            Submission::Pending(request) => request,
        }
    }

    pub fn state(&self) -> RequestState {
        self.request().state
    }
}

/// Arbitrates lock/unlock requests by role
pub struct LockdownWorkflow {
    accounts: Arc<dyn AccountRepository>,
    requests: Arc<dyn LockRequestRepository>,
    audit: AuditLog,
}

impl LockdownWorkflow {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        requests: Arc<dyn LockRequestRepository>,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            requests,
            audit,
        }
    }

    /// Lock or unlock `target` on behalf of `actor`.
    ///
    /// Superadmins execute directly. Admins file a pending request that needs
    /// a non-blank reason and may only target `user` accounts.
    pub async fn submit(
        &self,
        actor: Actor,
        target_id: AccountId,
        action: LockAction,
        reason: Option<String>,
    ) -> LockdownResult<Submission> {
        let policy = actor.role.policy();
        if !policy.can_request && !policy.can_execute_directly {
            return Err(LockdownError::Forbidden(actor.role));
        }

        let target = self.account(target_id).await?;
        if target.id == actor.account_id {
            return Err(LockdownError::SelfTarget);
        }
        if !policy.may_target(target.role) {
            return Err(LockdownError::TargetNotAllowed {
                actor: actor.role,
                target: target.role,
            });
        }

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if policy.requires_reason && reason.is_none() {
            return Err(LockdownError::ReasonRequired);
        }

        ensure_applicable(&target, action)?;

        let new = NewLockRequest {
            target_account_id: target.id,
            action,
            requested_by_account_id: Some(actor.account_id),
            requested_by_role: Some(actor.role),
            reason,
            created_at: Utc::now(),
        };

        if policy.can_execute_directly {
            let applied = self.requests.execute(new, Some(actor.account_id)).await?;
            self.record_effect(&applied, &target.username).await;
            return Ok(Submission::Executed(applied));
        }

        let request = self
            .requests
            .insert_pending(new)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => LockdownError::DuplicateRequest(action),
                other => other.into(),
            })?;

        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    AuditEventType::LockRequested,
                    format!(
                        "{} request #{} for {} awaiting review: {}",
                        action,
                        request.id,
                        target.username,
                        request.reason.as_deref().unwrap_or_default()
                    ),
                )
                .account(target.id),
            )
            .await;

        Ok(Submission::Pending(request))
    }

    /// Approve or reject a pending request. Exactly one concurrent review wins;
    /// the others see [`LockdownError::AlreadyResolved`].
    pub async fn review(
        &self,
        actor: Actor,
        request_id: LockRequestId,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> LockdownResult<AppliedRequest> {
        if !actor.role.policy().can_review {
            return Err(LockdownError::Forbidden(actor.role));
        }

        let resolution = Resolution {
            decision,
            reviewer_id: actor.account_id,
            comment: comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            resolved_at: Utc::now(),
        };

        let Some(applied) = self.requests.resolve(request_id, resolution).await? else {
            return match self.requests.find(request_id).await? {
                None => Err(LockdownError::RequestNotFound(request_id)),
                Some(request) => Err(LockdownError::AlreadyResolved(request.state)),
            };
        };

        let target = self.account(applied.request.target_account_id).await?;
        match decision {
            ReviewDecision::Approve => self.record_effect(&applied, &target.username).await,
            ReviewDecision::Reject => {
                self.audit
                    .record_best_effort(
                        NewAuditEvent::new(
                            AuditEventType::LockRequestRejected,
                            format!(
                                "{} request #{} for {} rejected",
                                applied.request.action, applied.request.id, target.username
                            ),
                        )
                        .account(target.id),
                    )
                    .await;
            }
        }

        Ok(applied)
    }

    /// Lock an account on behalf of the system (failed-attempt or risk policy).
    ///
    /// Returns `None` when the account is already locked.
    pub async fn system_lock(
        &self,
        target_id: AccountId,
        reason: impl Into<String>,
    ) -> LockdownResult<Option<AppliedRequest>> {
        let target = self.account(target_id).await?;
        if target.locked {
            return Ok(None);
        }

        let applied = self
            .requests
            .execute(
                NewLockRequest {
                    target_account_id: target.id,
                    action: LockAction::Lock,
                    requested_by_account_id: None,
                    requested_by_role: None,
                    reason: Some(reason.into()),
                    created_at: Utc::now(),
                },
                None,
            )
            .await?;

        self.record_effect(&applied, &target.username).await;
        Ok(Some(applied))
    }

    pub async fn list_pending(&self, actor: Actor, page: PageRequest) -> LockdownResult<LockRequestPage> {
        if !actor.role.policy().can_review {
            return Err(LockdownError::Forbidden(actor.role));
        }

        let page = page.normalized();
        let (data, total) = self.requests.list_pending(page).await?;
        Ok(LockRequestPage {
            data,
            pagination: Pagination::new(total, page),
        })
    }

    async fn account(&self, id: AccountId) -> LockdownResult<Account> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or(LockdownError::AccountNotFound(id))
    }

    async fn record_effect(&self, applied: &AppliedRequest, username: &str) {
        let request = &applied.request;
        let by = match (request.requested_by_role, request.requested_by_account_id) {
            (Some(role), Some(id)) => format!("{role} #{id}"),
            _ => "system".to_string(),
        };

        let (event_type, details) = match request.action {
            LockAction::Lock => (
                AuditEventType::AccountLocked,
                format!(
                    "Account {username} locked by {by} ({} session(s) closed){}",
                    applied.sessions_closed,
                    request
                        .reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                ),
            ),
            LockAction::Unlock => (
                AuditEventType::AccountUnlocked,
                format!("Account {username} unlocked by {by}"),
            ),
        };

        self.audit
            .record_best_effort(NewAuditEvent::new(event_type, details).account(request.target_account_id))
            .await;
    }
}

fn ensure_applicable(target: &Account, action: LockAction) -> LockdownResult<()> {
    match (action, target.locked) {
        (LockAction::Lock, true) => Err(LockdownError::AlreadyLocked),
        (LockAction::Unlock, false) => Err(LockdownError::NotLocked),
        _ => Ok(()),
    }
}
