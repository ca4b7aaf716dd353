//! Repository trait definitions.
//!
//! Every table sits behind a trait so the domain services can run against
//! PostgreSQL in production and [`MemoryStore`](super::MemoryStore) in tests.
//! Operations that touch more than one table (lock effects, successful logins,
//! heartbeats with telemetry) are single trait methods so each backend can make
//! them atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{PageRequest, StoreResult};
use crate::audit::{AuditEvent, AuditEventType, NewAuditEvent};
use crate::auth::{Account, AccountId, NewAccount};
use crate::device::{
    Device, DeviceId, DeviceStatus, HeartbeatUpdate, NewDevice, TelemetrySnapshot,
};
use crate::lockdown::{AppliedRequest, LockRequest, LockRequestId, NewLockRequest, Resolution};
use crate::session::{
    CloseOutcome, HistoryCounts, LoginHistoryFilter, LoginSession, NewLoginSession, SessionId,
};

/// Account table
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account; `Conflict` when the username exists
    async fn insert(&self, account: NewAccount) -> StoreResult<Account>;

    async fn find_by_id(&self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Account>>;

    /// Atomically add one failed attempt and return the updated row
    async fn increment_failed_attempts(&self, id: AccountId) -> StoreResult<Option<Account>>;
}

/// Device and telemetry tables
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Insert a new device; `Conflict` when the uuid exists
    async fn insert(&self, device: NewDevice) -> StoreResult<Device>;

    async fn find_by_id(&self, id: DeviceId) -> StoreResult<Option<Device>>;

    async fn find_by_uuid(&self, device_uuid: &str) -> StoreResult<Option<Device>>;

    /// Replace the token digest and descriptive fields of a non-revoked device
    async fn rotate_token(
        &self,
        id: DeviceId,
        token_hash: &str,
        hostname: Option<&str>,
        os_version: Option<&str>,
    ) -> StoreResult<Option<Device>>;

    /// Compare-and-set the status; `None` when the current status is not in `from`
    async fn transition(
        &self,
        id: DeviceId,
        from: &[DeviceStatus],
        to: DeviceStatus,
    ) -> StoreResult<Option<Device>>;

    /// Apply a heartbeat and store its telemetry in one step.
    ///
    /// Only applies while the stored token digest still equals `token_hash`,
    /// the device is not revoked and a given nonce differs from `last_nonce`.
    /// Trust is clamped to `0..=100`; the status follows
    /// [`HeartbeatUpdate::next_status`].
    async fn record_heartbeat(
        &self,
        id: DeviceId,
        token_hash: &str,
        update: HeartbeatUpdate,
    ) -> StoreResult<Option<Device>>;

    /// Mark active devices with no heartbeat since `cutoff` inactive
    async fn mark_stale(&self, cutoff: DateTime<Utc>, trust_penalty: i32)
    -> StoreResult<Vec<Device>>;

    async fn list(&self, page: PageRequest) -> StoreResult<(Vec<Device>, u64)>;

    async fn list_telemetry(
        &self,
        device_id: DeviceId,
        usb_only: bool,
        page: PageRequest,
    ) -> StoreResult<(Vec<TelemetrySnapshot>, u64)>;
}

/// Login session table
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a failed or rejected attempt (inactive)
    async fn insert_attempt(&self, session: NewLoginSession) -> StoreResult<LoginSession>;

    /// Store a successful login and update the account's last-login fields
    /// in one step. Resets failed attempts and records `country` when given.
    ///
    /// Returns `None` (and stores nothing) when the account is locked or gone.
    async fn insert_success(
        &self,
        session: NewLoginSession,
        country: Option<String>,
    ) -> StoreResult<Option<(LoginSession, Account)>>;

    async fn find(&self, id: SessionId) -> StoreResult<Option<LoginSession>>;

    /// Close a session; `None` for unknown ids
    async fn close(&self, id: SessionId, at: DateTime<Utc>) -> StoreResult<Option<CloseOutcome>>;

    /// Close every active session bound to the device; returns how many
    async fn close_for_device(&self, device_id: DeviceId, at: DateTime<Utc>) -> StoreResult<u64>;

    async fn last_successful(&self, account_id: AccountId) -> StoreResult<Option<LoginSession>>;

    async fn count_failed_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Newest-first page plus summary counts over the whole filtered set
    async fn history(
        &self,
        filter: &LoginHistoryFilter,
    ) -> StoreResult<(Vec<LoginSession>, HistoryCounts)>;
}

/// Lock request table; effects are applied to accounts and sessions in the same step
#[async_trait]
pub trait LockRequestRepository: Send + Sync {
    async fn find(&self, id: LockRequestId) -> StoreResult<Option<LockRequest>>;

    /// Insert a pending request; `Conflict` when one is already pending for
    /// the same target and action
    async fn insert_pending(&self, request: NewLockRequest) -> StoreResult<LockRequest>;

    /// Insert an already executed request and apply its effect
    async fn execute(
        &self,
        request: NewLockRequest,
        reviewer_id: Option<AccountId>,
    ) -> StoreResult<AppliedRequest>;

    /// Compare-and-set a pending request to its resolved state, applying the
    /// effect on approval. `None` when the request is no longer pending.
    async fn resolve(
        &self,
        id: LockRequestId,
        resolution: Resolution,
    ) -> StoreResult<Option<AppliedRequest>>;

    async fn list_pending(&self, page: PageRequest) -> StoreResult<(Vec<LockRequest>, u64)>;
}

/// Audit event table (append-only)
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: NewAuditEvent) -> StoreResult<AuditEvent>;

    async fn list(
        &self,
        account_id: Option<AccountId>,
        event_type: Option<AuditEventType>,
        page: PageRequest,
    ) -> StoreResult<(Vec<AuditEvent>, u64)>;
}

/// All repositories behind one handle
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub lock_requests: Arc<dyn LockRequestRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Stores {
    /// Fresh in-memory backend
    pub fn memory() -> Self {
        Self::from_backend(Arc::new(super::MemoryStore::new()))
    }

    /// PostgreSQL backend over an existing pool
    pub fn postgres(store: super::PgStore) -> Self {
        Self::from_backend(Arc::new(store))
    }

    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AccountRepository
            + DeviceRepository
            + SessionRepository
            + LockRequestRepository
            + AuditRepository
            + 'static,
    {
        Self {
            accounts: backend.clone(),
            devices: backend.clone(),
            sessions: backend.clone(),
            lock_requests: backend.clone(),
            audit: backend,
        }
    }
}
