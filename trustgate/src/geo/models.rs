//! Location data models.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Country code used for loopback and private-range addresses
pub const LOCAL_COUNTRY: &str = "LOCAL";

/// Country code used when a lookup answered without a country
pub const UNKNOWN_COUNTRY: &str = "UNKNOWN";

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Browser geolocation permission state as reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Prompt,
    #[default]
    Unavailable,
}

/// Coordinates reported by the browser, best-effort and optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserLocation {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub permission_status: PermissionStatus,
}

impl BrowserLocation {
    /// Usable coordinates, if permission was granted and both values are sane
    pub fn usable_coordinates(&self) -> Option<(f64, f64)> {
        if self.permission_status != PermissionStatus::Granted {
            return None;
        }

        let (lat, lon) = (self.latitude?, self.longitude?);
        let in_range = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);

        in_range.then_some((lat, lon))
    }
}

/// Where a [`GeoContext`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoSource {
    Browser,
    IpLookup,
    Unknown,
}

impl GeoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoSource::Browser => "browser",
            GeoSource::IpLookup => "ip_lookup",
            GeoSource::Unknown => "unknown",
        }
    }
}

impl FromStr for GeoSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(GeoSource::Browser),
            "ip_lookup" => Ok(GeoSource::IpLookup),
            "unknown" => Ok(GeoSource::Unknown),
            other => Err(format!("unknown geo source: {other}")),
        }
    }
}

/// Normalized location record attached to every login decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoContext {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub source: GeoSource,
}

impl GeoContext {
    /// No location information at all
    pub fn unknown() -> Self {
        Self {
            country: None,
            city: None,
            latitude: None,
            longitude: None,
            accuracy_m: None,
            source: GeoSource::Unknown,
        }
    }

    /// Loopback / private network origin
    pub fn local() -> Self {
        Self {
            country: Some(LOCAL_COUNTRY.to_string()),
            city: Some("Local".to_string()),
            ..Self::unknown()
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Country usable for comparisons (excludes `LOCAL` and `UNKNOWN`)
    pub fn comparable_country(&self) -> Option<&str> {
        self.country.as_deref().filter(|c| is_comparable_country(c))
    }

    /// "City, Country" for log lines
    pub fn display_location(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (None, Some(country)) => country.clone(),
            (Some(city), None) => city.clone(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

impl Default for GeoContext {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Result of an IP-to-location lookup
#[derive(Debug, Clone, PartialEq)]
pub struct IpLocation {
    pub country: String,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub fn is_comparable_country(country: &str) -> bool {
    !country.is_empty()
        && !country.eq_ignore_ascii_case(LOCAL_COUNTRY)
        && !country.eq_ignore_ascii_case(UNKNOWN_COUNTRY)
}

/// Great-circle distance in kilometres between two `(lat, lon)` points
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted(lat: Option<f64>, lon: Option<f64>) -> BrowserLocation {
        BrowserLocation {
            latitude: lat,
            longitude: lon,
            accuracy_m: Some(20.0),
            permission_status: PermissionStatus::Granted,
        }
    }

    #[test]
    fn test_browser_coordinates_require_permission() {
        let mut location = granted(Some(12.97), Some(77.59));
        assert_eq!(location.usable_coordinates(), Some((12.97, 77.59)));

        location.permission_status = PermissionStatus::Denied;
        assert_eq!(location.usable_coordinates(), None);
    }

    #[test]
    fn test_browser_coordinates_reject_partial_or_invalid() {
        assert!(granted(Some(12.0), None).usable_coordinates().is_none());
        assert!(granted(Some(f64::NAN), Some(1.0)).usable_coordinates().is_none());
        assert!(granted(Some(95.0), Some(1.0)).usable_coordinates().is_none());
    }

    #[test]
    fn test_haversine_known_distance() {
        // London -> Paris is roughly 344 km
        let d = haversine_km((51.5074, -0.1278), (48.8566, 2.3522));
        assert!((d - 343.5).abs() < 5.0, "got {d}");
        assert_eq!(haversine_km((10.0, 10.0), (10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_comparable_country() {
        assert!(is_comparable_country("IN"));
        assert!(!is_comparable_country("LOCAL"));
        assert!(!is_comparable_country("unknown"));
        assert_eq!(GeoContext::local().comparable_country(), None);
    }
}
