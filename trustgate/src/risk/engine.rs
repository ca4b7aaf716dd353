//! Login risk scoring.

use chrono::{DateTime, Utc};

use super::models::{DeviceSignal, PreviousLogin, RiskAssessment, RiskConfig, RiskStatus};
use crate::auth::Account;
use crate::error::DegradedSignal;
use crate::geo::{GeoContext, haversine_km, is_comparable_country};

/// Everything the engine looks at for one attempt
#[derive(Debug, Clone)]
pub struct AssessmentInput<'a> {
    /// Account state as of this attempt (after any failure increment)
    pub account: &'a Account,
    pub device: DeviceSignal<'a>,
    pub geo: &'a GeoContext,
    pub previous_login: Option<&'a PreviousLogin>,
    /// Failed attempts inside the sliding window, including this one if it failed
    pub failed_in_window: u32,
    pub degraded: &'a [DegradedSignal],
    pub now: DateTime<Utc>,
}

/// Pure scoring engine
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score an attempt. Missing inputs are neutral; this never fails.
    pub fn assess(&self, input: &AssessmentInput<'_>) -> RiskAssessment {
        let weights = &self.config.weights;
        let mut score = 0.0;
        let mut factors = Vec::new();
        let mut info = Vec::new();

        match input.device {
            DeviceSignal::Known(device) if !device.is_trusted(self.config.min_device_trust) => {
                score += weights.untrusted_device;
                factors.push(format!(
                    "Untrusted device: {} ({}, trust {})",
                    device.device_uuid, device.status, device.trust_level
                ));
            }
            DeviceSignal::Unregistered => {
                score += weights.untrusted_device;
                factors.push("Untrusted device: unregistered device presented".to_string());
            }
            DeviceSignal::Absent => info.push("No agent device bound to this login".to_string()),
            DeviceSignal::Known(_) => {}
        }

        let previous_country = input
            .account
            .last_login_country
            .as_deref()
            .filter(|c| is_comparable_country(c));
        if let (Some(previous), Some(current)) = (previous_country, input.geo.comparable_country())
        {
            if !previous.eq_ignore_ascii_case(current) {
                score += weights.country_mismatch;
                factors.push(format!("Country mismatch: {previous} -> {current}"));
            }
        }

        if let Some(factor) = self.impossible_travel(input) {
            score += weights.impossible_travel;
            factors.push(factor);
        }

        let consecutive = u32::try_from(input.account.failed_login_attempts).unwrap_or(0);
        let threshold = self.config.failed_burst_threshold;
        if input.failed_in_window >= threshold || consecutive >= threshold {
            score += weights.failed_burst;
            factors.push(format!(
                "Failed login burst: {} in {} min, {} consecutive",
                input.failed_in_window,
                self.config.failed_window.num_minutes(),
                consecutive
            ));
        }

        for signal in input.degraded {
            info.push(signal.as_factor());
        }

        if input.geo.coordinates().is_none() && input.geo.country.is_none() {
            score += weights.unknown_geo;
            info.push("Geolocation unknown".to_string());
        }

        factors.extend(info);

        let score = round4(score.clamp(0.0, 1.0));
        RiskAssessment {
            score,
            status: RiskStatus::from_score(score),
            factors,
        }
    }

    fn impossible_travel(&self, input: &AssessmentInput<'_>) -> Option<String> {
        let previous = input.previous_login?;
        let from = previous.coordinates()?;
        let to = input.geo.coordinates()?;

        let distance_km = haversine_km(from, to);
        if distance_km < self.config.min_travel_distance_km {
            return None;
        }

        let elapsed_secs = (input.now - previous.at).num_seconds().max(1) as f64;
        let speed_kmh = distance_km / (elapsed_secs / 3600.0);
        (speed_kmh > self.config.max_travel_speed_kmh).then(|| {
            format!(
                "Impossible travel: {distance_km:.0} km in {:.0} min ({speed_kmh:.0} km/h)",
                elapsed_secs / 60.0
            )
        })
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::device::{Device, DeviceStatus};
    use crate::geo::GeoSource;
    use chrono::Duration;

    fn account(failed: i32, last_country: Option<&str>) -> Account {
        Account {
            id: 7,
            username: "alice".to_string(),
            credential_hash: String::new(),
            role: Role::User,
            locked: false,
            failed_login_attempts: failed,
            last_login_country: last_country.map(str::to_string),
            last_login_at: None,
            locked_at: None,
            created_at: Utc::now(),
        }
    }

    fn device(status: DeviceStatus, trust: i32) -> Device {
        Device {
            id: 1,
            device_uuid: "agent-0001".to_string(),
            token_hash: String::new(),
            owner_account_id: None,
            hostname: None,
            os_version: None,
            status,
            last_heartbeat_at: None,
            trust_level: trust,
            registered_at: Utc::now(),
            last_nonce: None,
        }
    }

    fn geo(country: &str, lat: f64, lon: f64) -> GeoContext {
        GeoContext {
            country: Some(country.to_string()),
            city: None,
            latitude: Some(lat),
            longitude: Some(lon),
            accuracy_m: None,
            source: GeoSource::IpLookup,
        }
    }

    fn input<'a>(
        account: &'a Account,
        device: DeviceSignal<'a>,
        geo: &'a GeoContext,
    ) -> AssessmentInput<'a> {
        AssessmentInput {
            account,
            device,
            geo,
            previous_login: None,
            failed_in_window: 0,
            degraded: &[],
            now: Utc::now(),
        }
    }

    #[test]
    fn test_clean_login_is_normal() {
        let account = account(0, Some("IN"));
        let trusted = device(DeviceStatus::Active, 100);
        let here = geo("IN", 12.97, 77.59);

        let result = RiskEngine::default().assess(&input(&account, DeviceSignal::Known(&trusted), &here));
        assert_eq!(result.score, 0.0);
        assert_eq!(result.status, RiskStatus::Normal);
        assert!(result.factors.is_empty());
    }

    #[test]
    fn test_low_trust_active_device_is_untrusted() {
        let account = account(0, None);
        let weak = device(DeviceStatus::Active, 39);
        let here = geo("IN", 12.97, 77.59);

        let result = RiskEngine::default().assess(&input(&account, DeviceSignal::Known(&weak), &here));
        assert_eq!(result.score, 0.35);
        assert_eq!(result.status, RiskStatus::Suspicious);
        assert!(result.factors[0].starts_with("Untrusted device"));
    }

    #[test]
    fn test_country_mismatch_ignores_local() {
        let account = account(0, Some("LOCAL"));
        let here = geo("US", 40.7, -74.0);

        let result = RiskEngine::default().assess(&input(&account, DeviceSignal::Absent, &here));
        assert_eq!(result.score, 0.0);
        assert_eq!(result.factors, vec!["No agent device bound to this login".to_string()]);
    }

    #[test]
    fn test_impossible_travel_and_ordering() {
        let account = account(3, Some("IN"));
        let unregistered = DeviceSignal::Unregistered;
        let here = geo("US", 40.7128, -74.0060);
        let now = Utc::now();
        let previous = PreviousLogin {
            at: now - Duration::minutes(30),
            latitude: Some(12.97),
            longitude: Some(77.59),
        };

        let mut attempt = input(&account, unregistered, &here);
        attempt.previous_login = Some(&previous);
        attempt.now = now;

        let result = RiskEngine::default().assess(&attempt);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.status, RiskStatus::Critical);
        assert!(result.factors[0].starts_with("Untrusted device"));
        assert!(result.factors[1].starts_with("Country mismatch: IN -> US"));
        assert!(result.factors[2].starts_with("Impossible travel"));
        assert!(result.factors[3].starts_with("Failed login burst"));
    }

    #[test]
    fn test_short_hop_never_triggers_travel() {
        let account = account(0, None);
        let here = geo("IN", 12.97, 77.70);
        let now = Utc::now();
        let previous = PreviousLogin {
            at: now,
            latitude: Some(12.97),
            longitude: Some(77.59),
        };

        let mut attempt = input(&account, DeviceSignal::Absent, &here);
        attempt.previous_login = Some(&previous);
        attempt.now = now;

        assert_eq!(RiskEngine::default().assess(&attempt).score, 0.0);
    }

    #[test]
    fn test_degraded_and_unknown_geo_are_informational() {
        let account = account(0, Some("IN"));
        let unknown = GeoContext::unknown();
        let degraded = [DegradedSignal::new("geo", "lookup timed out")];

        let mut attempt = input(&account, DeviceSignal::Absent, &unknown);
        attempt.degraded = &degraded;

        let result = RiskEngine::default().assess(&attempt);
        assert_eq!(result.score, 0.0);
        assert_eq!(
            result.factors,
            vec![
                "No agent device bound to this login".to_string(),
                "Degraded signal: geo unavailable (lookup timed out)".to_string(),
                "Geolocation unknown".to_string(),
            ]
        );
    }

    #[test]
    fn test_window_burst_counts() {
        let account = account(1, None);
        let here = GeoContext::unknown();
        let mut attempt = input(&account, DeviceSignal::Absent, &here);
        attempt.failed_in_window = 3;

        let result = RiskEngine::default().assess(&attempt);
        assert_eq!(result.score, 0.25);
        assert_eq!(result.status, RiskStatus::Normal);
    }

    #[test]
    fn test_boundary_sums_classify_exactly() {
        // 0.35 + 0.25 lands on 0.6 after rounding
        let account = account(3, None);
        let pending = device(DeviceStatus::Pending, 100);
        let here = GeoContext::unknown();

        let result = RiskEngine::default().assess(&input(&account, DeviceSignal::Known(&pending), &here));
        assert_eq!(result.score, 0.6);
        assert_eq!(result.status, RiskStatus::Critical);
    }
}
