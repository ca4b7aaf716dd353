//! Device data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::auth::AccountId;

/// Device ID type
pub type DeviceId = i64;

/// Telemetry snapshot ID type
pub type TelemetryId = i64;

/// Highest (and initial) trust level
pub const MAX_TRUST_LEVEL: i32 = 100;

/// Device lifecycle state. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Active,
    Inactive,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeviceStatus::Pending),
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "revoked" => Ok(DeviceStatus::Revoked),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

/// Agent-registered machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub device_uuid: String,
    #[serde(skip)]
    pub token_hash: String,
    pub owner_account_id: Option<AccountId>,
    pub hostname: Option<String>,
    pub os_version: Option<String>,
    pub status: DeviceStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub trust_level: i32,
    pub registered_at: DateTime<Utc>,
    /// Nonce of the last accepted heartbeat
    #[serde(skip)]
    pub last_nonce: Option<String>,
}

impl Device {
    /// Active with at least `min_trust`
    pub fn is_trusted(&self, min_trust: i32) -> bool {
        self.status == DeviceStatus::Active && self.trust_level >= min_trust
    }

    /// Whether this device may be presented by `account_id` at login
    pub fn usable_by(&self, account_id: AccountId) -> bool {
        self.owner_account_id.is_none_or(|owner| owner == account_id)
    }
}

/// Fields for a new device row
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_uuid: String,
    pub token_hash: String,
    pub owner_account_id: Option<AccountId>,
    pub hostname: Option<String>,
    pub os_version: Option<String>,
    pub trust_level: i32,
    pub registered_at: DateTime<Utc>,
}

/// Agent registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_uuid: String,
    pub hostname: Option<String>,
    pub os_version: Option<String>,
    #[serde(default)]
    pub owner_account_id: Option<AccountId>,
}

/// Registration result. The secret token is only ever returned here.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device: Device,
    pub secret_token: String,
}

/// USB insertion/removal reported by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbEvent {
    pub event_type: String,
    pub device_name: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Heartbeat payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatTelemetry {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub usb_events: Vec<UsbEvent>,
    /// Agent-chosen value that must differ from the previous heartbeat's
    #[serde(default, skip_serializing)]
    pub nonce: Option<String>,
    /// When the agent produced the heartbeat
    #[serde(default, skip_serializing)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HeartbeatTelemetry {
    /// Resource usage at or above `threshold` percent
    pub fn is_suspicious(&self, threshold: f64) -> bool {
        [self.cpu_percent, self.memory_percent]
            .into_iter()
            .flatten()
            .any(|v| v >= threshold)
    }
}

/// Stored telemetry row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub id: TelemetryId,
    pub device_id: DeviceId,
    pub collected_at: DateTime<Utc>,
    pub metrics: serde_json::Value,
    pub usb_events: Vec<UsbEvent>,
}

/// Fields for a new telemetry row
#[derive(Debug, Clone)]
pub struct NewTelemetry {
    pub device_id: DeviceId,
    pub collected_at: DateTime<Utc>,
    pub metrics: serde_json::Value,
    pub usb_events: Vec<UsbEvent>,
}

/// Store-side effect of an accepted heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub at: DateTime<Utc>,
    pub trust_delta: i32,
    /// Becomes `last_nonce`; the update is refused while it equals the stored one
    pub nonce: Option<String>,
    /// Active or inactive devices whose trust ends below this are left inactive
    pub disable_below: i32,
    pub telemetry: NewTelemetry,
}

impl HeartbeatUpdate {
    /// Status after applying the update to a device in `current` with `trust` after the delta
    pub fn next_status(&self, current: DeviceStatus, trust: i32) -> DeviceStatus {
        match current {
            DeviceStatus::Active | DeviceStatus::Inactive if trust < self.disable_below => {
                DeviceStatus::Inactive
            }
            DeviceStatus::Inactive => DeviceStatus::Active,
            other => other,
        }
    }
}

/// Returned to the agent after a heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub trust_level: i32,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_extra_fields_flattened() {
        let telemetry: HeartbeatTelemetry = serde_json::from_str(
            r#"{"cpu_percent": 12.5, "usb_events": [{"event_type": "inserted", "device_name": "Kingston", "description": null, "occurred_at": null}], "disk_percent": 40}"#,
        )
        .unwrap();

        assert_eq!(telemetry.cpu_percent, Some(12.5));
        assert_eq!(telemetry.usb_events.len(), 1);
        assert_eq!(telemetry.extra.get("disk_percent"), Some(&serde_json::json!(40)));
    }

    #[test]
    fn test_nonce_and_timestamp_stay_out_of_stored_metrics() {
        let telemetry: HeartbeatTelemetry = serde_json::from_str(
            r#"{"cpu_percent": 3.0, "nonce": "n-1", "timestamp": "2025-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(telemetry.nonce.as_deref(), Some("n-1"));
        assert!(telemetry.timestamp.is_some());
        assert!(telemetry.extra.is_empty());

        let stored = serde_json::to_value(&telemetry).unwrap();
        assert!(stored.get("nonce").is_none());
        assert!(stored.get("timestamp").is_none());
    }

    #[test]
    fn test_heartbeat_status_transitions() {
        let update = HeartbeatUpdate {
            at: Utc::now(),
            trust_delta: 5,
            nonce: None,
            disable_below: 20,
            telemetry: NewTelemetry {
                device_id: 1,
                collected_at: Utc::now(),
                metrics: serde_json::Value::Null,
                usb_events: Vec::new(),
            },
        };

        assert_eq!(update.next_status(DeviceStatus::Inactive, 50), DeviceStatus::Active);
        assert_eq!(update.next_status(DeviceStatus::Inactive, 19), DeviceStatus::Inactive);
        assert_eq!(update.next_status(DeviceStatus::Active, 19), DeviceStatus::Inactive);
        assert_eq!(update.next_status(DeviceStatus::Active, 20), DeviceStatus::Active);
        assert_eq!(update.next_status(DeviceStatus::Pending, 0), DeviceStatus::Pending);
    }

    #[test]
    fn test_suspicious_threshold() {
        let mut telemetry = HeartbeatTelemetry {
            cpu_percent: Some(94.9),
            ..Default::default()
        };
        assert!(!telemetry.is_suspicious(95.0));

        telemetry.memory_percent = Some(95.0);
        assert!(telemetry.is_suspicious(95.0));
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            DeviceStatus::Pending,
            DeviceStatus::Active,
            DeviceStatus::Inactive,
            DeviceStatus::Revoked,
        ] {
            assert_eq!(status.as_str().parse::<DeviceStatus>(), Ok(status));
        }
    }
}
