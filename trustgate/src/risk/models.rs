//! Risk assessment data models and tunables.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Score at or above which a login is suspicious
pub const SUSPICIOUS_THRESHOLD: f64 = 0.3;

/// Score at or above which a login is critical
pub const CRITICAL_THRESHOLD: f64 = 0.6;

/// Classification of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskStatus {
    Normal,
    Suspicious,
    Critical,
}

impl RiskStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            RiskStatus::Critical
        } else if score >= SUSPICIOUS_THRESHOLD {
            RiskStatus::Suspicious
        } else {
            RiskStatus::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Normal => "normal",
            RiskStatus::Suspicious => "suspicious",
            RiskStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(RiskStatus::Normal),
            "suspicious" => Ok(RiskStatus::Suspicious),
            "critical" => Ok(RiskStatus::Critical),
            other => Err(format!("unknown risk status: {other}")),
        }
    }
}

/// Score contribution of each factor, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub untrusted_device: f64,
    pub country_mismatch: f64,
    pub impossible_travel: f64,
    pub failed_burst: f64,
    pub unknown_geo: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            untrusted_device: 0.35,
            country_mismatch: 0.25,
            impossible_travel: 0.30,
            failed_burst: 0.25,
            unknown_geo: 0.0,
        }
    }
}

impl RiskWeights {
    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("untrusted_device", self.untrusted_device),
            ("country_mismatch", self.country_mismatch),
            ("impossible_travel", self.impossible_travel),
            ("failed_burst", self.failed_burst),
            ("unknown_geo", self.unknown_geo),
        ]
    }
}

/// Risk engine configuration
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    /// Sliding window for counting failed attempts
    pub failed_window: Duration,
    pub failed_burst_threshold: u32,
    pub max_travel_speed_kmh: f64,
    pub min_travel_distance_km: f64,
    pub min_device_trust: i32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            failed_window: Duration::minutes(15),
            failed_burst_threshold: 3,
            max_travel_speed_kmh: 900.0,
            min_travel_distance_km: 50.0,
            min_device_trust: 40,
        }
    }
}

impl RiskConfig {
    /// Check tunables are within their documented ranges
    pub fn validate(&self) -> Result<(), String> {
        for (name, weight) in self.weights.named() {
            if !(0.0..=1.0).contains(&weight) {
                return Err(format!("risk weight {name} must be within [0, 1], got {weight}"));
            }
        }
        if self.failed_window <= Duration::zero() {
            return Err("failed attempt window must be positive".to_string());
        }
        if self.failed_burst_threshold == 0 {
            return Err("failed burst threshold must be at least 1".to_string());
        }
        if self.max_travel_speed_kmh.is_nan() || self.max_travel_speed_kmh <= 0.0 {
            return Err("max travel speed must be positive".to_string());
        }
        if !(0..=100).contains(&self.min_device_trust) {
            return Err("minimum device trust must be within 0..=100".to_string());
        }
        Ok(())
    }
}

/// Score, classification, and the ordered reasons behind them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub status: RiskStatus,
    pub factors: Vec<String>,
}

/// Previous successful login used for travel and country comparisons
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousLogin {
    pub at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl PreviousLogin {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Device presented with the login attempt
#[derive(Debug, Clone, Copy)]
pub enum DeviceSignal<'a> {
    /// No device uuid was presented
    Absent,
    /// A uuid was presented but no such device is registered
    Unregistered,
    Known(&'a crate::device::Device),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(RiskStatus::from_score(0.0), RiskStatus::Normal);
        assert_eq!(RiskStatus::from_score(0.2999), RiskStatus::Normal);
        assert_eq!(RiskStatus::from_score(0.3), RiskStatus::Suspicious);
        assert_eq!(RiskStatus::from_score(0.5999), RiskStatus::Suspicious);
        assert_eq!(RiskStatus::from_score(0.6), RiskStatus::Critical);
        assert_eq!(RiskStatus::from_score(1.0), RiskStatus::Critical);
    }

    #[test]
    fn test_config_validation() {
        assert!(RiskConfig::default().validate().is_ok());

        let mut config = RiskConfig::default();
        config.weights.country_mismatch = 1.5;
        assert!(config.validate().unwrap_err().contains("country_mismatch"));

        let config = RiskConfig {
            failed_window: Duration::zero(),
            ..RiskConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
