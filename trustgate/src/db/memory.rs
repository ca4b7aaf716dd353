//! In-memory store.
//!
//! All tables live behind one mutex, so every trait method (including the
//! multi-table ones) is a single critical section.
//!
//! Telemetry is kept per device and capped at [`MAX_TELEMETRY_PER_DEVICE`]
//! snapshots; the oldest are dropped first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;

use super::repository::{
    AccountRepository, AuditRepository, DeviceRepository, LockRequestRepository,
    SessionRepository,
};
use super::{PageRequest, StoreError, StoreResult};
use crate::audit::{AuditEvent, AuditEventType, NewAuditEvent};
use crate::auth::{Account, AccountId, NewAccount};
use crate::device::{
    Device, DeviceId, DeviceStatus, HeartbeatUpdate, MAX_TRUST_LEVEL, NewDevice,
    TelemetrySnapshot,
};
use crate::lockdown::{
    AppliedRequest, LockAction, LockRequest, LockRequestId, NewLockRequest, RequestState,
    Resolution, ReviewDecision,
};
use crate::risk::RiskStatus;
use crate::session::{
    CloseOutcome, HistoryCounts, LoginHistoryFilter, LoginOutcome, LoginSession, NewLoginSession,
    SessionId,
};

/// Snapshots retained per device
pub const MAX_TELEMETRY_PER_DEVICE: usize = 1_000;

#[derive(Default)]
struct IdCounters {
    account: i64,
    device: i64,
    telemetry: i64,
    session: i64,
    lock_request: i64,
    audit: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    devices: BTreeMap<DeviceId, Device>,
    telemetry: BTreeMap<DeviceId, VecDeque<TelemetrySnapshot>>,
    sessions: BTreeMap<SessionId, LoginSession>,
    lock_requests: BTreeMap<LockRequestId, LockRequest>,
    audit: Vec<AuditEvent>,
    ids: IdCounters,
}

impl Tables {
    /// Apply a lock/unlock effect to the target and its sessions
    fn apply_effect(
        &mut self,
        target: AccountId,
        action: LockAction,
        at: DateTime<Utc>,
    ) -> StoreResult<(Account, u64)> {
        let account = self
            .accounts
            .get_mut(&target)
            .ok_or_else(|| StoreError::Conflict(format!("account {target} does not exist")))?;

        match action {
            LockAction::Lock => {
                account.locked = true;
                account.locked_at = Some(at);
            }
            LockAction::Unlock => {
                account.locked = false;
                account.locked_at = None;
                account.failed_login_attempts = 0;
            }
        }
        let account = account.clone();

        let mut closed = 0;
        if action == LockAction::Lock {
            for session in self
                .sessions
                .values_mut()
                .filter(|s| s.account_id == target && s.is_active)
            {
                session.is_active = false;
                session.logout_at = Some(at);
                closed += 1;
            }
        }

        Ok((account, closed))
    }

    fn new_session(&mut self, new: NewLoginSession) -> LoginSession {
        let is_active = new.is_active();
        let session = LoginSession {
            id: next_id(&mut self.ids.session),
            account_id: new.account_id,
            device_id: new.device_id,
            ip_address: new.ip_address,
            geo: new.geo,
            risk_score: new.assessment.score,
            status: new.assessment.status,
            risk_factors: new.assessment.factors,
            outcome: new.outcome,
            login_at: new.login_at,
            logout_at: None,
            is_active,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }
}

/// Process-local store used by tests and `--memory` deployments
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_of<T: Clone>(items: Vec<T>, page: PageRequest) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    (page.normalized().slice(&items), total)
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert(&self, new: NewAccount) -> StoreResult<Account> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.values().any(|a| a.username == new.username) {
            return Err(StoreError::Conflict("username already exists".to_string()));
        }

        let account = Account {
            id: next_id(&mut tables.ids.account),
            username: new.username,
            credential_hash: new.credential_hash,
            role: new.role,
            locked: false,
            failed_login_attempts: 0,
            last_login_country: None,
            last_login_at: None,
            locked_at: None,
            created_at: new.created_at,
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn increment_failed_attempts(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.accounts.get_mut(&id).map(|account| {
            account.failed_login_attempts += 1;
            account.clone()
        }))
    }
}

#[async_trait]
impl DeviceRepository for MemoryStore {
    async fn insert(&self, new: NewDevice) -> StoreResult<Device> {
        let mut tables = self.tables.lock().await;
        if tables
            .devices
            .values()
            .any(|d| d.device_uuid == new.device_uuid)
        {
            return Err(StoreError::Conflict("device uuid already registered".to_string()));
        }

        let device = Device {
            id: next_id(&mut tables.ids.device),
            device_uuid: new.device_uuid,
            token_hash: new.token_hash,
            owner_account_id: new.owner_account_id,
            hostname: new.hostname,
            os_version: new.os_version,
            status: DeviceStatus::Pending,
            last_heartbeat_at: None,
            trust_level: new.trust_level,
            registered_at: new.registered_at,
            last_nonce: None,
        };
        tables.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn find_by_id(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        Ok(self.tables.lock().await.devices.get(&id).cloned())
    }

    async fn find_by_uuid(&self, device_uuid: &str) -> StoreResult<Option<Device>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .values()
            .find(|d| d.device_uuid == device_uuid)
            .cloned())
    }

    async fn rotate_token(
        &self,
        id: DeviceId,
        token_hash: &str,
        hostname: Option<&str>,
        os_version: Option<&str>,
    ) -> StoreResult<Option<Device>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .devices
            .get_mut(&id)
            .filter(|d| d.status != DeviceStatus::Revoked)
            .map(|device| {
                device.token_hash = token_hash.to_string();
                if let Some(hostname) = hostname {
                    device.hostname = Some(hostname.to_string());
                }
                if let Some(os_version) = os_version {
                    device.os_version = Some(os_version.to_string());
                }
                device.clone()
            }))
    }

    async fn transition(
        &self,
        id: DeviceId,
        from: &[DeviceStatus],
        to: DeviceStatus,
    ) -> StoreResult<Option<Device>> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .devices
            .get_mut(&id)
            .filter(|d| from.contains(&d.status))
            .map(|device| {
                device.status = to;
                device.clone()
            }))
    }

    async fn record_heartbeat(
        &self,
        id: DeviceId,
        token_hash: &str,
        update: HeartbeatUpdate,
    ) -> StoreResult<Option<Device>> {
        let mut tables = self.tables.lock().await;
        let Some(device) = tables.devices.get_mut(&id).filter(|d| {
            d.status != DeviceStatus::Revoked
                && d.token_hash == token_hash
                && (update.nonce.is_none() || d.last_nonce != update.nonce)
        }) else {
            return Ok(None);
        };

        device.last_heartbeat_at = Some(update.at);
        device.trust_level = (device.trust_level + update.trust_delta).clamp(0, MAX_TRUST_LEVEL);
        device.status = update.next_status(device.status, device.trust_level);
        if update.nonce.is_some() {
            device.last_nonce = update.nonce.clone();
        }
        let device = device.clone();

        let telemetry = update.telemetry;
        let snapshot = TelemetrySnapshot {
            id: next_id(&mut tables.ids.telemetry),
            device_id: telemetry.device_id,
            collected_at: telemetry.collected_at,
            metrics: telemetry.metrics,
            usb_events: telemetry.usb_events,
        };
        let history = tables.telemetry.entry(snapshot.device_id).or_default();
        history.push_back(snapshot);
        while history.len() > MAX_TELEMETRY_PER_DEVICE {
            history.pop_front();
        }

        Ok(Some(device))
    }

    async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
        trust_penalty: i32,
    ) -> StoreResult<Vec<Device>> {
        let mut tables = self.tables.lock().await;
        let mut marked = Vec::new();

        for device in tables.devices.values_mut().filter(|d| {
            d.status == DeviceStatus::Active
                && d.last_heartbeat_at.unwrap_or(d.registered_at) < cutoff
        }) {
            device.status = DeviceStatus::Inactive;
            device.trust_level = (device.trust_level - trust_penalty).clamp(0, MAX_TRUST_LEVEL);
            marked.push(device.clone());
        }

        Ok(marked)
    }

    async fn list(&self, page: PageRequest) -> StoreResult<(Vec<Device>, u64)> {
        let tables = self.tables.lock().await;
        let devices: Vec<Device> = tables.devices.values().rev().cloned().collect();
        Ok(page_of(devices, page))
    }

    async fn list_telemetry(
        &self,
        device_id: DeviceId,
        usb_only: bool,
        page: PageRequest,
    ) -> StoreResult<(Vec<TelemetrySnapshot>, u64)> {
        let tables = self.tables.lock().await;
        let snapshots: Vec<TelemetrySnapshot> = tables
            .telemetry
            .get(&device_id)
            .into_iter()
            .flat_map(|history| history.iter().rev())
            .filter(|t| !usb_only || !t.usb_events.is_empty())
            .cloned()
            .collect();
        Ok(page_of(snapshots, page))
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert_attempt(&self, new: NewLoginSession) -> StoreResult<LoginSession> {
        let mut tables = self.tables.lock().await;
        Ok(tables.new_session(new))
    }

    async fn insert_success(
        &self,
        new: NewLoginSession,
        country: Option<String>,
    ) -> StoreResult<Option<(LoginSession, Account)>> {
        let mut tables = self.tables.lock().await;
        let at = new.login_at;

        let Some(account) = tables
            .accounts
            .get_mut(&new.account_id)
            .filter(|a| !a.locked)
        else {
            return Ok(None);
        };

        account.failed_login_attempts = 0;
        account.last_login_at = Some(at);
        if country.is_some() {
            account.last_login_country = country;
        }
        let account = account.clone();

        let session = tables.new_session(new);
        Ok(Some((session, account)))
    }

    async fn find(&self, id: SessionId) -> StoreResult<Option<LoginSession>> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn close(&self, id: SessionId, at: DateTime<Utc>) -> StoreResult<Option<CloseOutcome>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.sessions.get_mut(&id).map(|session| {
            if session.is_active {
                session.is_active = false;
                session.logout_at = Some(at);
                CloseOutcome::Closed(session.clone())
            } else {
                CloseOutcome::AlreadyClosed(session.clone())
            }
        }))
    }

    async fn close_for_device(&self, device_id: DeviceId, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut closed = 0;
        for session in tables
            .sessions
            .values_mut()
            .filter(|s| s.is_active && s.device_id == Some(device_id))
        {
            session.is_active = false;
            session.logout_at = Some(at);
            closed += 1;
        }
        Ok(closed)
    }

    async fn last_successful(&self, account_id: AccountId) -> StoreResult<Option<LoginSession>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| s.account_id == account_id && s.outcome == LoginOutcome::Success)
            .max_by_key(|s| (s.login_at, s.id))
            .cloned())
    }

    async fn count_failed_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| {
                s.account_id == account_id
                    && s.outcome == LoginOutcome::BadCredentials
                    && s.login_at >= since
            })
            .count() as u64)
    }

    async fn history(
        &self,
        filter: &LoginHistoryFilter,
    ) -> StoreResult<(Vec<LoginSession>, HistoryCounts)> {
        let tables = self.tables.lock().await;

        let mut matching: Vec<LoginSession> = tables
            .sessions
            .values()
            .filter(|s| {
                filter.status.is_none_or(|status| s.status == status)
                    && filter.account_id.is_none_or(|id| s.account_id == id)
                    && filter.min_risk_score.is_none_or(|min| s.risk_score >= min)
                    && filter.country.as_deref().is_none_or(|country| {
                        s.geo
                            .country
                            .as_deref()
                            .is_some_and(|c| c.eq_ignore_ascii_case(country))
                    })
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.login_at.cmp(&a.login_at).then(b.id.cmp(&a.id)));

        let counts = HistoryCounts {
            total: matching.len() as u64,
            suspicious: matching
                .iter()
                .filter(|s| s.status == RiskStatus::Suspicious)
                .count() as u64,
            critical: matching
                .iter()
                .filter(|s| s.status == RiskStatus::Critical)
                .count() as u64,
        };

        Ok((filter.page.normalized().slice(&matching), counts))
    }
}

#[async_trait]
impl LockRequestRepository for MemoryStore {
    async fn find(&self, id: LockRequestId) -> StoreResult<Option<LockRequest>> {
        Ok(self.tables.lock().await.lock_requests.get(&id).cloned())
    }

    async fn insert_pending(&self, new: NewLockRequest) -> StoreResult<LockRequest> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables.lock_requests.values().any(|r| {
            r.state == RequestState::Pending
                && r.target_account_id == new.target_account_id
                && r.action == new.action
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "a pending {} request already exists",
                new.action
            )));
        }

        let request = LockRequest {
            id: next_id(&mut tables.ids.lock_request),
            target_account_id: new.target_account_id,
            action: new.action,
            requested_by_account_id: new.requested_by_account_id,
            requested_by_role: new.requested_by_role,
            reason: new.reason,
            state: RequestState::Pending,
            reviewed_by_account_id: None,
            comment: None,
            created_at: new.created_at,
            resolved_at: None,
        };
        tables.lock_requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn execute(
        &self,
        new: NewLockRequest,
        reviewer_id: Option<AccountId>,
    ) -> StoreResult<AppliedRequest> {
        let mut tables = self.tables.lock().await;
        let at = new.created_at;
        let (account, sessions_closed) =
            tables.apply_effect(new.target_account_id, new.action, at)?;

        let request = LockRequest {
            id: next_id(&mut tables.ids.lock_request),
            target_account_id: new.target_account_id,
            action: new.action,
            requested_by_account_id: new.requested_by_account_id,
            requested_by_role: new.requested_by_role,
            reason: new.reason,
            state: RequestState::Executed,
            reviewed_by_account_id: reviewer_id,
            comment: None,
            created_at: at,
            resolved_at: Some(at),
        };
        tables.lock_requests.insert(request.id, request.clone());

        Ok(AppliedRequest {
            request,
            account: Some(account),
            sessions_closed,
        })
    }

    async fn resolve(
        &self,
        id: LockRequestId,
        resolution: Resolution,
    ) -> StoreResult<Option<AppliedRequest>> {
        let mut tables = self.tables.lock().await;
        let Some(pending) = tables
            .lock_requests
            .get(&id)
            .filter(|r| r.state == RequestState::Pending)
            .cloned()
        else {
            return Ok(None);
        };

        let (account, sessions_closed) = match resolution.decision {
            ReviewDecision::Approve => {
                let (account, closed) = tables.apply_effect(
                    pending.target_account_id,
                    pending.action,
                    resolution.resolved_at,
                )?;
                (Some(account), closed)
            }
            ReviewDecision::Reject => (None, 0),
        };

        let request = LockRequest {
            state: resolution.decision.resulting_state(),
            reviewed_by_account_id: Some(resolution.reviewer_id),
            comment: resolution.comment,
            resolved_at: Some(resolution.resolved_at),
            ..pending
        };
        tables.lock_requests.insert(id, request.clone());

        Ok(Some(AppliedRequest {
            request,
            account,
            sessions_closed,
        }))
    }

    async fn list_pending(&self, page: PageRequest) -> StoreResult<(Vec<LockRequest>, u64)> {
        let tables = self.tables.lock().await;
        let pending: Vec<LockRequest> = tables
            .lock_requests
            .values()
            .rev()
            .filter(|r| r.state == RequestState::Pending)
            .cloned()
            .collect();
        Ok(page_of(pending, page))
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, new: NewAuditEvent) -> StoreResult<AuditEvent> {
        let mut tables = self.tables.lock().await;
        let event = AuditEvent {
            id: next_id(&mut tables.ids.audit),
            account_id: new.account_id,
            device_id: new.device_id,
            event_type: new.event_type,
            details: new.details,
            ip_address: new.ip_address,
            risk_score: new.risk_score,
            status: new.status,
            created_at: new.created_at,
        };
        tables.audit.push(event.clone());
        Ok(event)
    }

    async fn list(
        &self,
        account_id: Option<AccountId>,
        event_type: Option<AuditEventType>,
        page: PageRequest,
    ) -> StoreResult<(Vec<AuditEvent>, u64)> {
        let tables = self.tables.lock().await;
        let events: Vec<AuditEvent> = tables
            .audit
            .iter()
            .rev()
            .filter(|e| {
                account_id.is_none_or(|id| e.account_id == Some(id))
                    && event_type.is_none_or(|t| e.event_type == t)
            })
            .cloned()
            .collect();
        Ok(page_of(events, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::geo::GeoContext;
    use crate::risk::RiskAssessment;

    async fn account(store: &MemoryStore, name: &str) -> Account {
        AccountRepository::insert(
            store,
            NewAccount {
                username: name.to_string(),
                credential_hash: "hash".to_string(),
                role: Role::User,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap()
    }

    fn success(account_id: AccountId) -> NewLoginSession {
        NewLoginSession {
            account_id,
            device_id: None,
            ip_address: "10.0.0.1".to_string(),
            geo: GeoContext::local(),
            assessment: RiskAssessment {
                score: 0.0,
                status: RiskStatus::Normal,
                factors: vec![],
            },
            outcome: LoginOutcome::Success,
            login_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        account(&store, "alice").await;

        let err = AccountRepository::insert(
            &store,
            NewAccount {
                username: "alice".to_string(),
                credential_hash: "x".to_string(),
                role: Role::User,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_success_refused_while_locked() {
        let store = MemoryStore::new();
        let alice = account(&store, "alice").await;

        store
            .execute(
                NewLockRequest {
                    target_account_id: alice.id,
                    action: LockAction::Lock,
                    requested_by_account_id: None,
                    requested_by_role: None,
                    reason: None,
                    created_at: Utc::now(),
                },
                None,
            )
            .await
            .unwrap();

        let result = store.insert_success(success(alice.id), Some("IN".to_string())).await.unwrap();
        assert!(result.is_none());
        let (sessions, counts) = store.history(&LoginHistoryFilter::default()).await.unwrap();
        assert!(sessions.is_empty());
        assert_eq!(counts.total, 0);
    }

    #[tokio::test]
    async fn test_lock_effect_closes_active_sessions() {
        let store = MemoryStore::new();
        let alice = account(&store, "alice").await;
        for _ in 0..3 {
            store.insert_success(success(alice.id), None).await.unwrap();
        }

        let applied = store
            .execute(
                NewLockRequest {
                    target_account_id: alice.id,
                    action: LockAction::Lock,
                    requested_by_account_id: Some(99),
                    requested_by_role: Some(Role::Superadmin),
                    reason: None,
                    created_at: Utc::now(),
                },
                Some(99),
            )
            .await
            .unwrap();

        assert_eq!(applied.sessions_closed, 3);
        assert_eq!(applied.request.state, RequestState::Executed);
        assert!(applied.account.unwrap().locked);
    }

    async fn device(store: &MemoryStore, uuid: &str) -> Device {
        DeviceRepository::insert(
            store,
            NewDevice {
                device_uuid: uuid.to_string(),
                token_hash: "digest".to_string(),
                owner_account_id: None,
                hostname: None,
                os_version: None,
                trust_level: 50,
                registered_at: Utc::now(),
            },
        )
        .await
        .unwrap()
    }

    fn beat(device_id: DeviceId, nonce: Option<&str>) -> HeartbeatUpdate {
        HeartbeatUpdate {
            at: Utc::now(),
            trust_delta: 0,
            nonce: nonce.map(str::to_string),
            disable_below: 20,
            telemetry: crate::device::NewTelemetry {
                device_id,
                collected_at: Utc::now(),
                metrics: serde_json::json!({}),
                usb_events: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_telemetry_capped_per_device() {
        let store = MemoryStore::new();
        let busy = device(&store, "busy").await;
        let quiet = device(&store, "quiet").await;

        store.record_heartbeat(quiet.id, "digest", beat(quiet.id, None)).await.unwrap();
        for _ in 0..MAX_TELEMETRY_PER_DEVICE + 25 {
            store.record_heartbeat(busy.id, "digest", beat(busy.id, None)).await.unwrap();
        }

        let (newest, total) = store
            .list_telemetry(busy.id, false, PageRequest { page: 1, limit: 1 })
            .await
            .unwrap();
        assert_eq!(total, MAX_TELEMETRY_PER_DEVICE as u64);
        // oldest dropped, newest kept
        assert_eq!(newest[0].id, (MAX_TELEMETRY_PER_DEVICE + 26) as i64);

        let (_, quiet_total) = store
            .list_telemetry(quiet.id, false, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(quiet_total, 1);
    }

    #[tokio::test]
    async fn test_repeated_nonce_is_not_applied() {
        let store = MemoryStore::new();
        let laptop = device(&store, "laptop").await;

        let first = store.record_heartbeat(laptop.id, "digest", beat(laptop.id, Some("n-1"))).await;
        assert_eq!(first.unwrap().unwrap().last_nonce.as_deref(), Some("n-1"));

        let replay = store.record_heartbeat(laptop.id, "digest", beat(laptop.id, Some("n-1"))).await;
        assert!(replay.unwrap().is_none());

        let next = store.record_heartbeat(laptop.id, "digest", beat(laptop.id, Some("n-2"))).await;
        assert!(next.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_close_for_device_only_touches_bound_sessions() {
        let store = MemoryStore::new();
        let alice = account(&store, "alice").await;
        let laptop = device(&store, "laptop").await;

        let bound = NewLoginSession {
            device_id: Some(laptop.id),
            ..success(alice.id)
        };
        store.insert_success(bound.clone(), None).await.unwrap();
        store.insert_success(bound, None).await.unwrap();
        let (unbound, _) = store.insert_success(success(alice.id), None).await.unwrap().unwrap();

        assert_eq!(store.close_for_device(laptop.id, Utc::now()).await.unwrap(), 2);
        assert_eq!(store.close_for_device(laptop.id, Utc::now()).await.unwrap(), 0);
        assert!(SessionRepository::find(&store, unbound.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_resolve_is_compare_and_set() {
        let store = MemoryStore::new();
        let alice = account(&store, "alice").await;
        let pending = store
            .insert_pending(NewLockRequest {
                target_account_id: alice.id,
                action: LockAction::Lock,
                requested_by_account_id: Some(2),
                requested_by_role: Some(Role::Admin),
                reason: Some("shared credentials".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let resolution = Resolution {
            decision: ReviewDecision::Reject,
            reviewer_id: 1,
            comment: None,
            resolved_at: Utc::now(),
        };
        assert!(store.resolve(pending.id, resolution.clone()).await.unwrap().is_some());
        assert!(store.resolve(pending.id, resolution).await.unwrap().is_none());
    }
}
