//! Service wiring over a set of stores.

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::auth::{AuthConfig, AuthManager, AuthServices};
use crate::db::Stores;
use crate::device::{DeviceRegistry, DeviceTrustConfig};
use crate::geo::GeoResolver;
use crate::lockdown::LockdownWorkflow;
use crate::risk::{RiskConfig, RiskEngine};
use crate::session::SessionRegistry;

/// Tunables for every service
#[derive(Debug, Clone)]
pub struct TrustGateConfig {
    pub auth: AuthConfig,
    pub risk: RiskConfig,
    pub devices: DeviceTrustConfig,
}

impl TrustGateConfig {
    /// Default risk and device settings
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth,
            risk: RiskConfig::default(),
            devices: DeviceTrustConfig::default(),
        }
    }
}

/// All domain services sharing one set of stores
#[derive(Clone)]
pub struct TrustGate {
    pub auth: AuthManager,
    pub devices: Arc<DeviceRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub lockdown: Arc<LockdownWorkflow>,
    pub audit: AuditLog,
    pub stores: Stores,
}

impl TrustGate {
    pub fn new(stores: Stores, geo: GeoResolver, config: TrustGateConfig) -> Self {
        let audit = AuditLog::new(stores.audit.clone());

        let devices = Arc::new(DeviceRegistry::new(
            stores.devices.clone(),
            stores.sessions.clone(),
            audit.clone(),
            config.devices,
        ));
        let sessions = Arc::new(SessionRegistry::new(
            stores.accounts.clone(),
            stores.sessions.clone(),
            RiskEngine::new(config.risk),
            audit.clone(),
        ));
        let lockdown = Arc::new(LockdownWorkflow::new(
            stores.accounts.clone(),
            stores.lock_requests.clone(),
            audit.clone(),
        ));

        let auth = AuthManager::new(
            AuthServices {
                accounts: stores.accounts.clone(),
                geo,
                devices: devices.clone(),
                sessions: sessions.clone(),
                lockdown: lockdown.clone(),
                audit: audit.clone(),
            },
            config.auth,
        );

        Self {
            auth,
            devices,
            sessions,
            lockdown,
            audit,
            stores,
        }
    }
}
