//! Device trust registry: agent registration, heartbeats, approval and
//! revocation, and the background staleness sweep.
//!
//! Lifecycle: `pending -> active <-> inactive`, and any state `-> revoked`
//! (terminal). Trust starts at 100 and moves with heartbeat quality.

pub mod errors;
pub mod models;
pub mod registry;
pub mod token;

pub use errors::{DeviceError, DeviceResult};
pub use models::{
    Device, DeviceId, DeviceRegistration, DeviceStatus, HeartbeatAck, HeartbeatTelemetry,
    HeartbeatUpdate,
    MAX_TRUST_LEVEL, NewDevice, NewTelemetry, RegisterDevice, TelemetryId, TelemetrySnapshot,
    UsbEvent,
};
pub use registry::{DevicePage, DeviceRegistry, DeviceTrustConfig, TelemetryPage, validate_device_uuid};
