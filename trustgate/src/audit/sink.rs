//! Append-only audit sink.

use std::sync::Arc;

use super::models::{AuditEvent, AuditFilter, AuditPage, NewAuditEvent};
use crate::db::{AuditRepository, Pagination, StoreResult};

/// Persists audit events and mirrors each one to the log
#[derive(Clone)]
pub struct AuditLog {
    repository: Arc<dyn AuditRepository>,
}

impl AuditLog {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self { repository }
    }

    /// Append an event
    pub async fn record(&self, event: NewAuditEvent) -> StoreResult<AuditEvent> {
        let stored = self.repository.append(event).await?;

        if stored.event_type.is_security_relevant() {
            log::warn!(
                "audit {} account={:?} device={:?} ip={:?} risk={:.4}/{}: {}",
                stored.event_type,
                stored.account_id,
                stored.device_id,
                stored.ip_address,
                stored.risk_score,
                stored.status,
                stored.details
            );
        } else {
            log::info!(
                "audit {} account={:?} device={:?}: {}",
                stored.event_type,
                stored.account_id,
                stored.device_id,
                stored.details
            );
        }

        Ok(stored)
    }

    /// Append an event where a storage failure must not abort the caller.
    ///
    /// The primary state change has already been committed by then.
    pub async fn record_best_effort(&self, event: NewAuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.record(event).await {
            log::error!("failed to persist audit event {event_type}: {e}");
        }
    }

    /// Newest-first page of events
    pub async fn list(&self, filter: AuditFilter) -> StoreResult<AuditPage> {
        let page = filter.page.normalized();
        let (data, total) = self
            .repository
            .list(filter.account_id, filter.event_type, page)
            .await?;

        Ok(AuditPage {
            data,
            pagination: Pagination::new(total, page),
        })
    }
}
