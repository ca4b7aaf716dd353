//! Device trust registry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use super::models::{
    Device, DeviceId, DeviceRegistration, DeviceStatus, HeartbeatAck, HeartbeatTelemetry,
    HeartbeatUpdate, MAX_TRUST_LEVEL, NewDevice, NewTelemetry, RegisterDevice, TelemetrySnapshot,
};
use super::token::{generate_secret_token, hash_token, verify_token};
use super::{DeviceError, DeviceResult};
use crate::audit::{AuditEventType, AuditLog, NewAuditEvent};
use crate::auth::Actor;
use crate::db::{DeviceRepository, PageRequest, Pagination, SessionRepository, StoreError};

/// Trust and liveness tunables
#[derive(Debug, Clone)]
pub struct DeviceTrustConfig {
    /// Heartbeat age after which an active device becomes inactive
    pub staleness_threshold: ChronoDuration,
    pub sweep_interval: Duration,
    /// Interval agents are told to heartbeat at
    pub heartbeat_interval: Duration,
    pub stale_penalty: i32,
    pub suspicious_penalty: i32,
    pub heartbeat_recovery: i32,
    /// CPU or memory usage (percent) at which telemetry counts as suspicious
    pub suspicious_usage_percent: f64,
    /// Oldest agent timestamp a heartbeat may carry
    pub max_heartbeat_age: ChronoDuration,
    /// Trust below which an active device is disabled (moved to inactive)
    pub disable_below_trust: i32,
    /// Trust below which the device's open sessions are closed
    pub min_session_trust: i32,
}

impl Default for DeviceTrustConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: ChronoDuration::minutes(2),
            sweep_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            stale_penalty: 20,
            suspicious_penalty: 30,
            heartbeat_recovery: 5,
            suspicious_usage_percent: 95.0,
            max_heartbeat_age: ChronoDuration::seconds(60),
            disable_below_trust: 20,
            min_session_trust: 40,
        }
    }
}

impl DeviceTrustConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval.is_zero() {
            return Err("device sweep interval must be positive".to_string());
        }
        let sweep = ChronoDuration::from_std(self.sweep_interval)
            .map_err(|_| "device sweep interval is too large".to_string())?;
        if self.staleness_threshold <= sweep {
            return Err("device staleness threshold must exceed the sweep interval".to_string());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("agent heartbeat interval must be positive".to_string());
        }
        if self.max_heartbeat_age <= ChronoDuration::zero() {
            return Err("maximum heartbeat age must be positive".to_string());
        }
        for (name, value) in [
            ("device disable trust", self.disable_below_trust),
            ("session trust floor", self.min_session_trust),
        ] {
            if !(0..=MAX_TRUST_LEVEL).contains(&value) {
                return Err(format!("{name} must be within 0..={MAX_TRUST_LEVEL}"));
            }
        }
        Ok(())
    }
}

/// One page of devices
#[derive(Debug, Clone, serde::Serialize)]
pub struct DevicePage {
    pub data: Vec<Device>,
    pub pagination: Pagination,
}

/// One page of telemetry snapshots
#[derive(Debug, Clone, serde::Serialize)]
pub struct TelemetryPage {
    pub data: Vec<TelemetrySnapshot>,
    pub pagination: Pagination,
}

/// Registers agent devices and tracks their trust state
pub struct DeviceRegistry {
    devices: Arc<dyn DeviceRepository>,
    sessions: Arc<dyn SessionRepository>,
    audit: AuditLog,
    config: DeviceTrustConfig,
}

impl DeviceRegistry {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        sessions: Arc<dyn SessionRepository>,
        audit: AuditLog,
        config: DeviceTrustConfig,
    ) -> Self {
        Self {
            devices,
            sessions,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &DeviceTrustConfig {
        &self.config
    }

    /// Register a device, or rotate the token of a known one.
    ///
    /// New devices start `pending` at full trust. A known, non-revoked device
    /// keeps its status; its previous token stops working.
    pub async fn register(&self, request: RegisterDevice) -> DeviceResult<DeviceRegistration> {
        validate_device_uuid(&request.device_uuid)?;

        let secret_token = generate_secret_token();
        let token_hash = hash_token(&secret_token);

        if let Some(existing) = self.devices.find_by_uuid(&request.device_uuid).await? {
            return self
                .rotate(existing, &request, secret_token, &token_hash)
                .await;
        }

        let inserted = self
            .devices
            .insert(NewDevice {
                device_uuid: request.device_uuid.clone(),
                token_hash: token_hash.clone(),
                owner_account_id: request.owner_account_id,
                hostname: request.hostname.clone(),
                os_version: request.os_version.clone(),
                trust_level: MAX_TRUST_LEVEL,
                registered_at: Utc::now(),
            })
            .await;

        let device = match inserted {
            Ok(device) => device,
            // Lost a registration race for the same uuid
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .devices
                    .find_by_uuid(&request.device_uuid)
                    .await?
                    .ok_or(DeviceError::NotRegistered)?;
                return self
                    .rotate(existing, &request, secret_token, &token_hash)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    AuditEventType::DeviceRegistered,
                    format!(
                        "Device {} registered ({})",
                        device.device_uuid,
                        device.hostname.as_deref().unwrap_or("unknown host")
                    ),
                )
                .device(Some(device.id)),
            )
            .await;

        Ok(DeviceRegistration {
            device,
            secret_token,
        })
    }

    async fn rotate(
        &self,
        existing: Device,
        request: &RegisterDevice,
        secret_token: String,
        token_hash: &str,
    ) -> DeviceResult<DeviceRegistration> {
        if existing.status == DeviceStatus::Revoked {
            return Err(DeviceError::DeviceRevoked);
        }

        let device = self
            .devices
            .rotate_token(
                existing.id,
                token_hash,
                request.hostname.as_deref(),
                request.os_version.as_deref(),
            )
            .await?
            .ok_or(DeviceError::DeviceRevoked)?;

        log::info!("Rotated token for device {}", device.device_uuid);
        Ok(DeviceRegistration {
            device,
            secret_token,
        })
    }

    /// `pending -> active`
    pub async fn approve(&self, actor: Actor, device_id: DeviceId) -> DeviceResult<Device> {
        ensure_can_manage(actor)?;

        let device = self
            .transition(device_id, &[DeviceStatus::Pending], DeviceStatus::Active, "pending")
            .await?;

        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    AuditEventType::DeviceApproved,
                    format!("Device {} approved", device.device_uuid),
                )
                .account(actor.account_id)
                .device(Some(device.id)),
            )
            .await;

        Ok(device)
    }

    /// Any state -> `revoked`. Irreversible; closes the device's sessions.
    pub async fn revoke(&self, actor: Actor, device_id: DeviceId) -> DeviceResult<Device> {
        ensure_can_manage(actor)?;

        let device = self
            .transition(
                device_id,
                &[
                    DeviceStatus::Pending,
                    DeviceStatus::Active,
                    DeviceStatus::Inactive,
                ],
                DeviceStatus::Revoked,
                "not revoked",
            )
            .await
            .map_err(|e| match e {
                DeviceError::InvalidTransition {
                    current: DeviceStatus::Revoked,
                    ..
                } => DeviceError::DeviceRevoked,
                other => other,
            })?;

        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    AuditEventType::DeviceRevoked,
                    format!("Device {} revoked", device.device_uuid),
                )
                .account(actor.account_id)
                .device(Some(device.id)),
            )
            .await;

        self.close_sessions(&device, "device revoked", Utc::now()).await?;
        Ok(device)
    }

    /// Close the device's active sessions and audit how many were closed
    async fn close_sessions(
        &self,
        device: &Device,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DeviceResult<u64> {
        let closed = self.sessions.close_for_device(device.id, at).await?;
        if closed > 0 {
            log::warn!(
                "Closed {closed} session(s) bound to device {}: {reason}",
                device.device_uuid
            );
            self.audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::DeviceSessionsRevoked,
                        format!(
                            "Closed {closed} session(s) of device {}: {reason}",
                            device.device_uuid
                        ),
                    )
                    .maybe_account(device.owner_account_id)
                    .device(Some(device.id)),
                )
                .await;
        }
        Ok(closed)
    }

    fn dropped_below_session_floor(&self, before: i32, after: i32) -> bool {
        before >= self.config.min_session_trust && after < self.config.min_session_trust
    }

    async fn transition(
        &self,
        device_id: DeviceId,
        from: &[DeviceStatus],
        to: DeviceStatus,
        expected: &'static str,
    ) -> DeviceResult<Device> {
        if let Some(device) = self.devices.transition(device_id, from, to).await? {
            return Ok(device);
        }

        match self.devices.find_by_id(device_id).await? {
            None => Err(DeviceError::NotFound(device_id)),
            Some(current) => Err(DeviceError::InvalidTransition {
                current: current.status,
                expected,
            }),
        }
    }

    /// Authenticated liveness report from an agent.
    ///
    /// A wrong token, an old timestamp or a repeated nonce changes nothing.
    /// Inactive devices come back to active; any non-pending device whose
    /// trust ends below `disable_below_trust` is left inactive. Pending
    /// devices stay pending until approved. Dropping below
    /// `min_session_trust` closes the device's sessions.
    pub async fn heartbeat(
        &self,
        device_uuid: &str,
        secret_token: &str,
        telemetry: HeartbeatTelemetry,
    ) -> DeviceResult<HeartbeatAck> {
        let device = self
            .devices
            .find_by_uuid(device_uuid)
            .await?
            .ok_or(DeviceError::NotRegistered)?;

        if device.status == DeviceStatus::Revoked {
            return Err(DeviceError::DeviceRevoked);
        }
        if !verify_token(secret_token, &device.token_hash) {
            log::warn!("Heartbeat with invalid token for device {device_uuid}");
            return Err(DeviceError::InvalidToken);
        }

        let received_at = Utc::now();
        if let Some(sent_at) = telemetry.timestamp {
            let age = received_at - sent_at;
            if age > self.config.max_heartbeat_age {
                log::warn!(
                    "Heartbeat from device {device_uuid} is {}s old",
                    age.num_seconds()
                );
                return Err(DeviceError::StaleHeartbeat(age.num_seconds()));
            }
        }
        if telemetry.nonce.is_some() && telemetry.nonce == device.last_nonce {
            return Err(self.replay_detected(&device).await);
        }

        let suspicious = telemetry.is_suspicious(self.config.suspicious_usage_percent);
        let trust_delta = if suspicious {
            -self.config.suspicious_penalty
        } else {
            self.config.heartbeat_recovery
        };

        let snapshot = NewTelemetry {
            device_id: device.id,
            collected_at: telemetry
                .timestamp
                .filter(|sent_at| *sent_at <= received_at)
                .unwrap_or(received_at),
            metrics: serde_json::to_value(&telemetry).unwrap_or_default(),
            usb_events: telemetry.usb_events,
        };
        let update = HeartbeatUpdate {
            at: received_at,
            trust_delta,
            nonce: telemetry.nonce,
            disable_below: self.config.disable_below_trust,
            telemetry: snapshot,
        };

        let updated = self
            .devices
            .record_heartbeat(device.id, &device.token_hash, update.clone())
            .await?;

        let Some(updated) = updated else {
            // Token rotated, device revoked or nonce taken since the lookup
            return match self.devices.find_by_id(device.id).await? {
                Some(current) if current.status == DeviceStatus::Revoked => {
                    Err(DeviceError::DeviceRevoked)
                }
                Some(current)
                    if current.token_hash == device.token_hash
                        && update.nonce.is_some()
                        && current.last_nonce == update.nonce =>
                {
                    Err(self.replay_detected(&current).await)
                }
                _ => Err(DeviceError::InvalidToken),
            };
        };

        if suspicious {
            log::warn!(
                "Suspicious telemetry from device {device_uuid}, trust now {}",
                updated.trust_level
            );
        }

        if device.status == DeviceStatus::Inactive && updated.status == DeviceStatus::Active {
            self.audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::DeviceReactivated,
                        format!("Device {device_uuid} resumed heartbeats"),
                    )
                    .device(Some(updated.id)),
                )
                .await;
        }

        let disabled =
            device.status == DeviceStatus::Active && updated.status == DeviceStatus::Inactive;
        if disabled {
            log::warn!(
                "Device {device_uuid} disabled, trust {} below {}",
                updated.trust_level,
                self.config.disable_below_trust
            );
            self.audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::DeviceDisabled,
                        format!(
                            "Device {device_uuid} disabled at trust {}",
                            updated.trust_level
                        ),
                    )
                    .maybe_account(updated.owner_account_id)
                    .device(Some(updated.id)),
                )
                .await;
        }

        if disabled || self.dropped_below_session_floor(device.trust_level, updated.trust_level) {
            let reason = format!("trust dropped to {}", updated.trust_level);
            self.close_sessions(&updated, &reason, received_at).await?;
        }

        Ok(HeartbeatAck {
            device_id: updated.id,
            status: updated.status,
            trust_level: updated.trust_level,
            received_at,
        })
    }

    /// Mark active devices without a recent heartbeat inactive.
    ///
    /// A device whose penalty takes it below `min_session_trust` loses its
    /// open sessions.
    pub async fn sweep_stale(&self) -> DeviceResult<Vec<Device>> {
        let now = Utc::now();
        let cutoff = now - self.config.staleness_threshold;
        let marked = self
            .devices
            .mark_stale(cutoff, self.config.stale_penalty)
            .await?;

        for device in &marked {
            let before = device.trust_level + self.config.stale_penalty;
            if self.dropped_below_session_floor(before, device.trust_level) {
                let reason = format!("missed heartbeats, trust {}", device.trust_level);
                self.close_sessions(device, &reason, now).await?;
            }

            self.audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::DeviceInactive,
                        format!(
                            "Device {} missed heartbeats, trust now {}",
                            device.device_uuid, device.trust_level
                        ),
                    )
                    .device(Some(device.id)),
                )
                .await;
        }

        Ok(marked)
    }

    /// Run [`sweep_stale`](Self::sweep_stale) every `sweep_interval` until aborted.
    ///
    /// `on_marked` sees every non-empty batch of devices the sweep deactivated.
    pub fn spawn_staleness_sweep<F>(self: Arc<Self>, on_marked: F) -> JoinHandle<()>
    where
        F: Fn(&[Device]) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.sweep_stale().await {
                    Ok(marked) if !marked.is_empty() => {
                        log::info!("Device sweep marked {} device(s) inactive", marked.len());
                        on_marked(&marked);
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("Device sweep failed: {e}"),
                }
            }
        })
    }

    async fn replay_detected(&self, device: &Device) -> DeviceError {
        log::warn!("Replayed heartbeat nonce for device {}", device.device_uuid);
        self.audit
            .record_best_effort(
                NewAuditEvent::new(
                    AuditEventType::HeartbeatReplay,
                    format!("Duplicate heartbeat nonce from device {}", device.device_uuid),
                )
                .device(Some(device.id)),
            )
            .await;
        DeviceError::ReplayDetected
    }

    /// Current row of a device, if it exists
    pub async fn find(&self, device_id: DeviceId) -> DeviceResult<Option<Device>> {
        Ok(self.devices.find_by_id(device_id).await?)
    }

    /// Device lookup for the login path
    pub async fn find_for_login(&self, device_uuid: &str) -> DeviceResult<Option<Device>> {
        Ok(self.devices.find_by_uuid(device_uuid).await?)
    }

    pub async fn list(&self, actor: Actor, page: PageRequest) -> DeviceResult<DevicePage> {
        ensure_can_manage(actor)?;

        let page = page.normalized();
        let (data, total) = self.devices.list(page).await?;
        Ok(DevicePage {
            data,
            pagination: Pagination::new(total, page),
        })
    }

    pub async fn telemetry(
        &self,
        actor: Actor,
        device_id: DeviceId,
        usb_only: bool,
        page: PageRequest,
    ) -> DeviceResult<TelemetryPage> {
        ensure_can_manage(actor)?;

        if self.devices.find_by_id(device_id).await?.is_none() {
            return Err(DeviceError::NotFound(device_id));
        }

        let page = page.normalized();
        let (data, total) = self
            .devices
            .list_telemetry(device_id, usb_only, page)
            .await?;
        Ok(TelemetryPage {
            data,
            pagination: Pagination::new(total, page),
        })
    }
}

fn ensure_can_manage(actor: Actor) -> DeviceResult<()> {
    if actor.role.policy().can_manage_devices {
        Ok(())
    } else {
        Err(DeviceError::Forbidden)
    }
}

/// 8..=128 characters of `[A-Za-z0-9-_:.]`
pub fn validate_device_uuid(device_uuid: &str) -> DeviceResult<()> {
    let len = device_uuid.len();
    if !(8..=128).contains(&len) {
        return Err(DeviceError::InvalidUuid(format!(
            "must be 8 to 128 characters, got {len}"
        )));
    }

    if let Some(bad) = device_uuid
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
    {
        return Err(DeviceError::InvalidUuid(format!(
            "unexpected character {bad:?}"
        )));
    }

    Ok(())
}
