//! PostgreSQL store.
//!
//! Runtime-checked queries over a shared [`PgPool`]. Multi-table operations
//! run inside one transaction; lock request resolution is a conditional
//! `UPDATE .. WHERE state = 'pending' RETURNING` so only one reviewer wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgConnection, PgPool, Postgres, QueryBuilder, Row,
    postgres::PgRow,
    types::Json,
};
use std::{str::FromStr, time::Duration};

use super::repository::{
    AccountRepository, AuditRepository, DeviceRepository, LockRequestRepository,
    SessionRepository,
};
use super::timeouts::{with_timeout, with_transaction_timeout};
use super::{DatabaseConfig, PageRequest, StoreError, StoreResult};
use crate::audit::{AuditEvent, AuditEventType, NewAuditEvent};
use crate::auth::{Account, AccountId, NewAccount};
use crate::device::{
    Device, DeviceId, DeviceStatus, HeartbeatUpdate, NewDevice, TelemetrySnapshot, UsbEvent,
};
use crate::geo::GeoContext;
use crate::lockdown::{
    AppliedRequest, LockAction, LockRequest, LockRequestId, NewLockRequest, RequestState,
    Resolution, ReviewDecision,
};
use crate::session::{
    CloseOutcome, HistoryCounts, LoginHistoryFilter, LoginOutcome, LoginSession, NewLoginSession,
    SessionId,
};

const ACCOUNT_COLUMNS: &str = "id, username, credential_hash, role, locked, failed_login_attempts, \
     last_login_country, last_login_at, locked_at, created_at";

const DEVICE_COLUMNS: &str = "id, device_uuid, token_hash, owner_account_id, hostname, os_version, \
     status, last_heartbeat_at, trust_level, registered_at, last_nonce";

const SESSION_COLUMNS: &str = "id, account_id, device_id, ip_address, geo_country, geo_city, \
     geo_latitude, geo_longitude, geo_accuracy_m, geo_source, risk_score, status, risk_factors, \
     outcome, login_at, logout_at, is_active";

const LOCK_REQUEST_COLUMNS: &str = "id, target_account_id, action, requested_by_account_id, \
     requested_by_role, reason, state, reviewed_by_account_id, comment, created_at, resolved_at";

const AUDIT_COLUMNS: &str =
    "id, account_id, device_id, event_type, details, ip_address, risk_score, status, created_at";

/// PostgreSQL implementation of every repository trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
    transaction_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            query_timeout: config.query_timeout,
            transaction_timeout: config.transaction_timeout,
        }
    }

    async fn heartbeat_tx(
        &self,
        id: DeviceId,
        token_hash: &str,
        update: HeartbeatUpdate,
    ) -> StoreResult<Option<Device>> {
        let mut tx = self.pool.begin().await?;

        // SET expressions see the pre-update row
        let sql = format!(
            "UPDATE devices SET last_heartbeat_at = $3, \
             trust_level = LEAST(GREATEST(trust_level + $4, 0), 100), \
             status = CASE \
               WHEN status IN ('active', 'inactive') \
                 AND LEAST(GREATEST(trust_level + $4, 0), 100) < $6 THEN 'inactive' \
               WHEN status = 'inactive' THEN 'active' \
               ELSE status END, \
             last_nonce = COALESCE($5, last_nonce) \
             WHERE id = $1 AND token_hash = $2 AND status <> 'revoked' \
               AND ($5::text IS NULL OR last_nonce IS DISTINCT FROM $5) \
             RETURNING {DEVICE_COLUMNS}"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(id)
            .bind(token_hash)
            .bind(update.at)
            .bind(update.trust_delta)
            .bind(update.nonce.as_deref())
            .bind(update.disable_below)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let device = device_from_row(&row)?;

        let telemetry = update.telemetry;
        sqlx::query(
            "INSERT INTO device_telemetry (device_id, collected_at, metrics, usb_events, \
             usb_event_count) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(telemetry.device_id)
        .bind(telemetry.collected_at)
        .bind(&telemetry.metrics)
        .bind(Json(&telemetry.usb_events))
        .bind(i32::try_from(telemetry.usb_events.len()).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(device))
    }

    async fn insert_attempt_conn(&self, new: NewLoginSession) -> StoreResult<LoginSession> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, &new).await
    }

    async fn insert_success_tx(
        &self,
        new: NewLoginSession,
        country: Option<String>,
    ) -> StoreResult<Option<(LoginSession, Account)>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes against a concurrent lock effect
        let locked: Option<bool> =
            sqlx::query_scalar("SELECT locked FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(new.account_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked != Some(false) {
            return Ok(None);
        }

        let sql = format!(
            "UPDATE accounts SET failed_login_attempts = 0, last_login_at = $2, \
             last_login_country = COALESCE($3, last_login_country) \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.account_id)
            .bind(new.login_at)
            .bind(&country)
            .fetch_one(&mut *tx)
            .await?;
        let account = account_from_row(&row)?;

        let session = insert_session(&mut tx, &new).await?;
        tx.commit().await?;

        Ok(Some((session, account)))
    }

    async fn execute_tx(
        &self,
        new: NewLockRequest,
        reviewer_id: Option<AccountId>,
    ) -> StoreResult<AppliedRequest> {
        let mut tx = self.pool.begin().await?;
        let at = new.created_at;

        let (account, sessions_closed) =
            apply_effect(&mut tx, new.target_account_id, new.action, at).await?;

        let sql = format!(
            "INSERT INTO lock_requests (target_account_id, action, requested_by_account_id, \
             requested_by_role, reason, state, reviewed_by_account_id, created_at, resolved_at) \
             VALUES ($1, $2, $3, $4, $5, 'executed', $6, $7, $7) \
             RETURNING {LOCK_REQUEST_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.target_account_id)
            .bind(new.action.as_str())
            .bind(new.requested_by_account_id)
            .bind(new.requested_by_role.map(|r| r.as_str()))
            .bind(&new.reason)
            .bind(reviewer_id)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;
        let request = lock_request_from_row(&row)?;

        tx.commit().await?;
        Ok(AppliedRequest {
            request,
            account: Some(account),
            sessions_closed,
        })
    }

    async fn resolve_tx(
        &self,
        id: LockRequestId,
        resolution: Resolution,
    ) -> StoreResult<Option<AppliedRequest>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE lock_requests SET state = $2, reviewed_by_account_id = $3, comment = $4, \
             resolved_at = $5 WHERE id = $1 AND state = $6 RETURNING {LOCK_REQUEST_COLUMNS}"
        );
        let Some(row) = sqlx::query(&sql)
            .bind(id)
            .bind(resolution.decision.resulting_state().as_str())
            .bind(resolution.reviewer_id)
            .bind(&resolution.comment)
            .bind(resolution.resolved_at)
            .bind(RequestState::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let request = lock_request_from_row(&row)?;

        let (account, sessions_closed) = match resolution.decision {
            ReviewDecision::Approve => {
                let (account, closed) = apply_effect(
                    &mut tx,
                    request.target_account_id,
                    request.action,
                    resolution.resolved_at,
                )
                .await?;
                (Some(account), closed)
            }
            ReviewDecision::Reject => (None, 0),
        };

        tx.commit().await?;
        Ok(Some(AppliedRequest {
            request,
            account,
            sessions_closed,
        }))
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::Corrupt)
}

fn parse_optional_column<T>(row: &PgRow, column: &str) -> StoreResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| r.parse().map_err(StoreError::Corrupt)).transpose()
}

fn unique_violation_as_conflict(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        credential_hash: row.try_get("credential_hash")?,
        role: parse_column(row, "role")?,
        locked: row.try_get("locked")?,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        last_login_country: row.try_get("last_login_country")?,
        last_login_at: row.try_get("last_login_at")?,
        locked_at: row.try_get("locked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn device_from_row(row: &PgRow) -> StoreResult<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        device_uuid: row.try_get("device_uuid")?,
        token_hash: row.try_get("token_hash")?,
        owner_account_id: row.try_get("owner_account_id")?,
        hostname: row.try_get("hostname")?,
        os_version: row.try_get("os_version")?,
        status: parse_column(row, "status")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        trust_level: row.try_get("trust_level")?,
        registered_at: row.try_get("registered_at")?,
        last_nonce: row.try_get("last_nonce")?,
    })
}

fn telemetry_from_row(row: &PgRow) -> StoreResult<TelemetrySnapshot> {
    let usb_events: Json<Vec<UsbEvent>> = row.try_get("usb_events")?;
    Ok(TelemetrySnapshot {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        collected_at: row.try_get("collected_at")?,
        metrics: row.try_get("metrics")?,
        usb_events: usb_events.0,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<LoginSession> {
    let risk_factors: Json<Vec<String>> = row.try_get("risk_factors")?;
    Ok(LoginSession {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        device_id: row.try_get("device_id")?,
        ip_address: row.try_get("ip_address")?,
        geo: GeoContext {
            country: row.try_get("geo_country")?,
            city: row.try_get("geo_city")?,
            latitude: row.try_get("geo_latitude")?,
            longitude: row.try_get("geo_longitude")?,
            accuracy_m: row.try_get("geo_accuracy_m")?,
            source: parse_column(row, "geo_source")?,
        },
        risk_score: row.try_get("risk_score")?,
        status: parse_column(row, "status")?,
        risk_factors: risk_factors.0,
        outcome: parse_column(row, "outcome")?,
        login_at: row.try_get("login_at")?,
        logout_at: row.try_get("logout_at")?,
        is_active: row.try_get("is_active")?,
    })
}

fn lock_request_from_row(row: &PgRow) -> StoreResult<LockRequest> {
    Ok(LockRequest {
        id: row.try_get("id")?,
        target_account_id: row.try_get("target_account_id")?,
        action: parse_column(row, "action")?,
        requested_by_account_id: row.try_get("requested_by_account_id")?,
        requested_by_role: parse_optional_column(row, "requested_by_role")?,
        reason: row.try_get("reason")?,
        state: parse_column(row, "state")?,
        reviewed_by_account_id: row.try_get("reviewed_by_account_id")?,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditEvent> {
    Ok(AuditEvent {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        device_id: row.try_get("device_id")?,
        event_type: parse_column(row, "event_type")?,
        details: row.try_get("details")?,
        ip_address: row.try_get("ip_address")?,
        risk_score: row.try_get("risk_score")?,
        status: parse_column(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn page_bounds(page: PageRequest) -> (i64, i64) {
    let page = page.normalized();
    (
        i64::from(page.limit),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

async fn insert_session(conn: &mut PgConnection, new: &NewLoginSession) -> StoreResult<LoginSession> {
    let sql = format!(
        "INSERT INTO login_sessions (account_id, device_id, ip_address, geo_country, geo_city, \
         geo_latitude, geo_longitude, geo_accuracy_m, geo_source, risk_score, status, risk_factors, \
         outcome, login_at, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING {SESSION_COLUMNS}"
    );
    let row = sqlx::query(&sql)
        .bind(new.account_id)
        .bind(new.device_id)
        .bind(&new.ip_address)
        .bind(&new.geo.country)
        .bind(&new.geo.city)
        .bind(new.geo.latitude)
        .bind(new.geo.longitude)
        .bind(new.geo.accuracy_m)
        .bind(new.geo.source.as_str())
        .bind(new.assessment.score)
        .bind(new.assessment.status.as_str())
        .bind(Json(&new.assessment.factors))
        .bind(new.outcome.as_str())
        .bind(new.login_at)
        .bind(new.is_active())
        .fetch_one(&mut *conn)
        .await?;

    session_from_row(&row)
}

/// Apply a lock/unlock effect to the account and its sessions
async fn apply_effect(
    conn: &mut PgConnection,
    target: AccountId,
    action: LockAction,
    at: DateTime<Utc>,
) -> StoreResult<(Account, u64)> {
    let row = match action {
        LockAction::Lock => {
            let sql = format!(
                "UPDATE accounts SET locked = TRUE, locked_at = $2 WHERE id = $1 \
                 RETURNING {ACCOUNT_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(target)
                .bind(at)
                .fetch_optional(&mut *conn)
                .await?
        }
        LockAction::Unlock => {
            let sql = format!(
                "UPDATE accounts SET locked = FALSE, locked_at = NULL, failed_login_attempts = 0 \
                 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
            );
            sqlx::query(&sql)
                .bind(target)
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    let row =
        row.ok_or_else(|| StoreError::Conflict(format!("account {target} does not exist")))?;
    let account = account_from_row(&row)?;

    let sessions_closed = match action {
        LockAction::Lock => sqlx::query(
            "UPDATE login_sessions SET is_active = FALSE, logout_at = $2 \
             WHERE account_id = $1 AND is_active",
        )
        .bind(target)
        .bind(at)
        .execute(&mut *conn)
        .await?
        .rows_affected(),
        LockAction::Unlock => 0,
    };

    Ok((account, sessions_closed))
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn insert(&self, new: NewAccount) -> StoreResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (username, credential_hash, role, created_at) \
             VALUES ($1, $2, $3, $4) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(&new.username)
                .bind(&new.credential_hash)
                .bind(new.role.as_str())
                .bind(new.created_at)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|e| match e {
            StoreError::Database(db) => unique_violation_as_conflict(db, "username already exists"),
            other => other,
        })?;

        account_from_row(&row)
    }

    async fn find_by_id(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(username).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn increment_failed_attempts(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let sql = format!(
            "UPDATE accounts SET failed_login_attempts = failed_login_attempts + 1 \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }
}

#[async_trait]
impl DeviceRepository for PgStore {
    async fn insert(&self, new: NewDevice) -> StoreResult<Device> {
        let sql = format!(
            "INSERT INTO devices (device_uuid, token_hash, owner_account_id, hostname, os_version, \
             status, trust_level, registered_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7) RETURNING {DEVICE_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(&new.device_uuid)
                .bind(&new.token_hash)
                .bind(new.owner_account_id)
                .bind(&new.hostname)
                .bind(&new.os_version)
                .bind(new.trust_level)
                .bind(new.registered_at)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|e| match e {
            StoreError::Database(db) => {
                unique_violation_as_conflict(db, "device uuid already registered")
            }
            other => other,
        })?;

        device_from_row(&row)
    }

    async fn find_by_id(&self, id: DeviceId) -> StoreResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_by_uuid(&self, device_uuid: &str) -> StoreResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_uuid = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(device_uuid).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn rotate_token(
        &self,
        id: DeviceId,
        token_hash: &str,
        hostname: Option<&str>,
        os_version: Option<&str>,
    ) -> StoreResult<Option<Device>> {
        let sql = format!(
            "UPDATE devices SET token_hash = $2, \
             hostname = COALESCE($3, hostname), os_version = COALESCE($4, os_version) \
             WHERE id = $1 AND status <> 'revoked' RETURNING {DEVICE_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(id)
                .bind(token_hash)
                .bind(hostname)
                .bind(os_version)
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn transition(
        &self,
        id: DeviceId,
        from: &[DeviceStatus],
        to: DeviceStatus,
    ) -> StoreResult<Option<Device>> {
        let from: Vec<&str> = from.iter().map(DeviceStatus::as_str).collect();
        let sql = format!(
            "UPDATE devices SET status = $3 WHERE id = $1 AND status = ANY($2) \
             RETURNING {DEVICE_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(id)
                .bind(&from[..])
                .bind(to.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn record_heartbeat(
        &self,
        id: DeviceId,
        token_hash: &str,
        update: HeartbeatUpdate,
    ) -> StoreResult<Option<Device>> {
        with_transaction_timeout(
            self.transaction_timeout,
            self.heartbeat_tx(id, token_hash, update),
        )
        .await
    }

    async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
        trust_penalty: i32,
    ) -> StoreResult<Vec<Device>> {
        let sql = format!(
            "UPDATE devices SET status = 'inactive', trust_level = GREATEST(trust_level - $2, 0) \
             WHERE status = 'active' AND COALESCE(last_heartbeat_at, registered_at) < $1 \
             RETURNING {DEVICE_COLUMNS}"
        );
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(cutoff)
                .bind(trust_penalty)
                .fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    async fn list(&self, page: PageRequest) -> StoreResult<(Vec<Device>, u64)> {
        let (limit, offset) = page_bounds(page);
        let total: i64 = with_timeout(
            self.query_timeout,
            sqlx::query_scalar("SELECT COUNT(*) FROM devices").fetch_one(&self.pool),
        )
        .await?;

        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id DESC LIMIT $1 OFFSET $2"
        );
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
        )
        .await?;

        let devices = rows.iter().map(device_from_row).collect::<StoreResult<_>>()?;
        Ok((devices, total.max(0) as u64))
    }

    async fn list_telemetry(
        &self,
        device_id: DeviceId,
        usb_only: bool,
        page: PageRequest,
    ) -> StoreResult<(Vec<TelemetrySnapshot>, u64)> {
        let (limit, offset) = page_bounds(page);
        let total: i64 = with_timeout(
            self.query_timeout,
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM device_telemetry \
                 WHERE device_id = $1 AND (NOT $2 OR usb_event_count > 0)",
            )
            .bind(device_id)
            .bind(usb_only)
            .fetch_one(&self.pool),
        )
        .await?;

        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT id, device_id, collected_at, metrics, usb_events FROM device_telemetry \
                 WHERE device_id = $1 AND (NOT $2 OR usb_event_count > 0) \
                 ORDER BY collected_at DESC, id DESC LIMIT $3 OFFSET $4",
            )
            .bind(device_id)
            .bind(usb_only)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool),
        )
        .await?;

        let snapshots = rows.iter().map(telemetry_from_row).collect::<StoreResult<_>>()?;
        Ok((snapshots, total.max(0) as u64))
    }
}

fn push_history_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a LoginHistoryFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(country) = filter.country.as_deref() {
        builder.push(" AND UPPER(geo_country) = UPPER(").push_bind(country).push(")");
    }
    if let Some(min_score) = filter.min_risk_score {
        builder.push(" AND risk_score >= ").push_bind(min_score);
    }
    if let Some(account_id) = filter.account_id {
        builder.push(" AND account_id = ").push_bind(account_id);
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn insert_attempt(&self, new: NewLoginSession) -> StoreResult<LoginSession> {
        with_transaction_timeout(self.query_timeout, self.insert_attempt_conn(new)).await
    }

    async fn insert_success(
        &self,
        new: NewLoginSession,
        country: Option<String>,
    ) -> StoreResult<Option<(LoginSession, Account)>> {
        with_transaction_timeout(self.transaction_timeout, self.insert_success_tx(new, country))
            .await
    }

    async fn find(&self, id: SessionId) -> StoreResult<Option<LoginSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM login_sessions WHERE id = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn close(&self, id: SessionId, at: DateTime<Utc>) -> StoreResult<Option<CloseOutcome>> {
        let sql = format!(
            "UPDATE login_sessions SET is_active = FALSE, logout_at = $2 \
             WHERE id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        );
        let closed = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).bind(at).fetch_optional(&self.pool),
        )
        .await?;

        if let Some(row) = closed {
            return Ok(Some(CloseOutcome::Closed(session_from_row(&row)?)));
        }

        Ok(SessionRepository::find(self, id).await?.map(CloseOutcome::AlreadyClosed))
    }

    async fn close_for_device(&self, device_id: DeviceId, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE login_sessions SET is_active = FALSE, logout_at = $2 \
                 WHERE device_id = $1 AND is_active",
            )
            .bind(device_id)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn last_successful(&self, account_id: AccountId) -> StoreResult<Option<LoginSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM login_sessions \
             WHERE account_id = $1 AND outcome = $2 ORDER BY login_at DESC, id DESC LIMIT 1"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(account_id)
                .bind(LoginOutcome::Success.as_str())
                .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn count_failed_since(
        &self,
        account_id: AccountId,
        since: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let count: i64 = with_timeout(
            self.query_timeout,
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM login_sessions \
                 WHERE account_id = $1 AND outcome = $2 AND login_at >= $3",
            )
            .bind(account_id)
            .bind(LoginOutcome::BadCredentials.as_str())
            .bind(since)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn history(
        &self,
        filter: &LoginHistoryFilter,
    ) -> StoreResult<(Vec<LoginSession>, HistoryCounts)> {
        let (limit, offset) = page_bounds(filter.page);

        let mut counts_query = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE status = 'suspicious') AS suspicious, \
             COUNT(*) FILTER (WHERE status = 'critical') AS critical \
             FROM login_sessions WHERE TRUE",
        );
        push_history_filters(&mut counts_query, filter);
        let counts_row =
            with_timeout(self.query_timeout, counts_query.build().fetch_one(&self.pool)).await?;
        let count = |column: &str| -> StoreResult<u64> {
            Ok(counts_row.try_get::<i64, _>(column)?.max(0) as u64)
        };
        let counts = HistoryCounts {
            total: count("total")?,
            suspicious: count("suspicious")?,
            critical: count("critical")?,
        };

        let mut page_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SESSION_COLUMNS} FROM login_sessions WHERE TRUE"
        ));
        push_history_filters(&mut page_query, filter);
        page_query
            .push(" ORDER BY login_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows =
            with_timeout(self.query_timeout, page_query.build().fetch_all(&self.pool)).await?;

        let sessions = rows.iter().map(session_from_row).collect::<StoreResult<_>>()?;
        Ok((sessions, counts))
    }
}

#[async_trait]
impl LockRequestRepository for PgStore {
    async fn find(&self, id: LockRequestId) -> StoreResult<Option<LockRequest>> {
        let sql = format!("SELECT {LOCK_REQUEST_COLUMNS} FROM lock_requests WHERE id = $1");
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql).bind(id).fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(lock_request_from_row).transpose()
    }

    async fn insert_pending(&self, new: NewLockRequest) -> StoreResult<LockRequest> {
        let sql = format!(
            "INSERT INTO lock_requests (target_account_id, action, requested_by_account_id, \
             requested_by_role, reason, state, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6) RETURNING {LOCK_REQUEST_COLUMNS}"
        );
        let conflict = format!("a pending {} request already exists", new.action);
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(new.target_account_id)
                .bind(new.action.as_str())
                .bind(new.requested_by_account_id)
                .bind(new.requested_by_role.map(|r| r.as_str()))
                .bind(&new.reason)
                .bind(new.created_at)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|e| match e {
            StoreError::Database(db) => unique_violation_as_conflict(db, &conflict),
            other => other,
        })?;

        lock_request_from_row(&row)
    }

    async fn execute(
        &self,
        new: NewLockRequest,
        reviewer_id: Option<AccountId>,
    ) -> StoreResult<AppliedRequest> {
        with_transaction_timeout(self.transaction_timeout, self.execute_tx(new, reviewer_id)).await
    }

    async fn resolve(
        &self,
        id: LockRequestId,
        resolution: Resolution,
    ) -> StoreResult<Option<AppliedRequest>> {
        with_transaction_timeout(self.transaction_timeout, self.resolve_tx(id, resolution)).await
    }

    async fn list_pending(&self, page: PageRequest) -> StoreResult<(Vec<LockRequest>, u64)> {
        let (limit, offset) = page_bounds(page);
        let total: i64 = with_timeout(
            self.query_timeout,
            sqlx::query_scalar("SELECT COUNT(*) FROM lock_requests WHERE state = 'pending'")
                .fetch_one(&self.pool),
        )
        .await?;

        let sql = format!(
            "SELECT {LOCK_REQUEST_COLUMNS} FROM lock_requests WHERE state = 'pending' \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
        )
        .await?;

        let requests = rows.iter().map(lock_request_from_row).collect::<StoreResult<_>>()?;
        Ok((requests, total.max(0) as u64))
    }
}

fn push_audit_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    account_id: Option<AccountId>,
    event_type: Option<AuditEventType>,
) {
    if let Some(account_id) = account_id {
        builder.push(" AND account_id = ").push_bind(account_id);
    }
    if let Some(event_type) = event_type {
        builder.push(" AND event_type = ").push_bind(event_type.as_str());
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append(&self, new: NewAuditEvent) -> StoreResult<AuditEvent> {
        let sql = format!(
            "INSERT INTO audit_events (account_id, device_id, event_type, details, ip_address, \
             risk_score, status, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {AUDIT_COLUMNS}"
        );
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&sql)
                .bind(new.account_id)
                .bind(new.device_id)
                .bind(new.event_type.as_str())
                .bind(&new.details)
                .bind(&new.ip_address)
                .bind(new.risk_score)
                .bind(new.status.as_str())
                .bind(new.created_at)
                .fetch_one(&self.pool),
        )
        .await?;

        audit_from_row(&row)
    }

    async fn list(
        &self,
        account_id: Option<AccountId>,
        event_type: Option<AuditEventType>,
        page: PageRequest,
    ) -> StoreResult<(Vec<AuditEvent>, u64)> {
        let (limit, offset) = page_bounds(page);

        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_events WHERE TRUE");
        push_audit_filters(&mut count_query, account_id, event_type);
        let total: i64 = with_timeout(
            self.query_timeout,
            count_query.build_query_scalar().fetch_one(&self.pool),
        )
        .await?;

        let mut page_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events WHERE TRUE"
        ));
        push_audit_filters(&mut page_query, account_id, event_type);
        page_query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows =
            with_timeout(self.query_timeout, page_query.build().fetch_all(&self.pool)).await?;

        let events = rows.iter().map(audit_from_row).collect::<StoreResult<_>>()?;
        Ok((events, total.max(0) as u64))
    }
}
