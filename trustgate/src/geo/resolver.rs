//! IP lookup and the bounded "resolve GeoContext" call used during login.

use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use super::models::{BrowserLocation, GeoContext, GeoSource, IpLocation, UNKNOWN_COUNTRY};
use super::{GeoError, GeoResult};
use crate::error::DegradedSignal;

/// Default lookup endpoint; `{ip}` is substituted
pub const DEFAULT_LOOKUP_URL: &str = "https://ipapi.co/{ip}/json/";

/// Default bound on a single lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// IP-to-location service
#[async_trait]
pub trait IpLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> GeoResult<IpLocation>;
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// JSON-over-HTTP locator (ipapi.co compatible response shape)
pub struct HttpIpLocator {
    client: reqwest::Client,
    url_template: String,
}

impl HttpIpLocator {
    pub fn new(url_template: impl Into<String>, request_timeout: Duration) -> GeoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("trustgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.url_template.replace("{ip}", &ip.to_string())
    }
}

#[async_trait]
impl IpLocator for HttpIpLocator {
    async fn locate(&self, ip: IpAddr) -> GeoResult<IpLocation> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await?
            .error_for_status()?;

        let body: LookupResponse = response.json().await?;
        if body.error {
            return Err(GeoError::Lookup(
                body.reason.unwrap_or_else(|| "lookup refused".to_string()),
            ));
        }

        Ok(IpLocation {
            country: body
                .country_code
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string()),
            city: body.city.filter(|c| !c.is_empty()),
            latitude: body.latitude,
            longitude: body.longitude,
        })
    }
}

/// Fixed table of answers. Unlisted addresses are `NotFound`.
///
/// Used when external lookups are disabled and in tests.
#[derive(Default)]
pub struct StaticIpLocator {
    entries: HashMap<IpAddr, IpLocation>,
}

impl StaticIpLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: IpAddr, location: IpLocation) -> Self {
        self.entries.insert(ip, location);
        self
    }
}

#[async_trait]
impl IpLocator for StaticIpLocator {
    async fn locate(&self, ip: IpAddr) -> GeoResult<IpLocation> {
        self.entries.get(&ip).cloned().ok_or(GeoError::NotFound(ip))
    }
}

/// Outcome of resolving a login's location
#[derive(Debug, Clone)]
pub struct Resolution {
    pub geo: GeoContext,
    pub degraded: Option<DegradedSignal>,
}

/// Combines browser coordinates with a bounded IP lookup
#[derive(Clone)]
pub struct GeoResolver {
    locator: Arc<dyn IpLocator>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(locator: Arc<dyn IpLocator>, timeout: Duration) -> Self {
        Self { locator, timeout }
    }

    /// Resolver that never leaves the process
    pub fn offline() -> Self {
        Self::new(Arc::new(StaticIpLocator::new()), DEFAULT_LOOKUP_TIMEOUT)
    }

    /// Resolve the location of a login attempt. Never fails; outages come
    /// back as a degraded signal next to an `unknown` (or browser-only) context.
    pub async fn resolve(
        &self,
        ip: Option<IpAddr>,
        browser: Option<&BrowserLocation>,
    ) -> Resolution {
        let (ip_location, degraded) = match ip {
            Some(ip) if is_local_address(ip) => (Some(local_location()), None),
            Some(ip) => match self.lookup(ip).await {
                Ok(location) => (Some(location), None),
                Err(e) => {
                    log::warn!("IP lookup for {ip} failed: {e}");
                    (None, Some(DegradedSignal::new("geo", e.to_string())))
                }
            },
            None => (
                None,
                Some(DegradedSignal::new("geo", "client address unavailable")),
            ),
        };

        let browser_coordinates = browser.and_then(BrowserLocation::usable_coordinates);
        let geo = build_context(ip, ip_location, browser, browser_coordinates);

        Resolution { geo, degraded }
    }

    async fn lookup(&self, ip: IpAddr) -> GeoResult<IpLocation> {
        match tokio::time::timeout(self.timeout, self.locator.locate(ip)).await {
            Ok(result) => result,
            Err(_) => Err(GeoError::Timeout(self.timeout)),
        }
    }
}

fn local_location() -> IpLocation {
    let local = GeoContext::local();
    IpLocation {
        country: local.country.unwrap_or_default(),
        city: local.city,
        latitude: None,
        longitude: None,
    }
}

fn build_context(
    ip: Option<IpAddr>,
    ip_location: Option<IpLocation>,
    browser: Option<&BrowserLocation>,
    browser_coordinates: Option<(f64, f64)>,
) -> GeoContext {
    let is_local = ip.is_some_and(is_local_address);

    match (browser_coordinates, ip_location) {
        (Some((lat, lon)), location) => GeoContext {
            country: location.as_ref().map(|l| l.country.clone()),
            city: location.and_then(|l| l.city),
            latitude: Some(lat),
            longitude: Some(lon),
            accuracy_m: browser.and_then(|b| b.accuracy_m),
            source: GeoSource::Browser,
        },
        (None, Some(location)) if is_local => GeoContext {
            country: Some(location.country),
            city: location.city,
            ..GeoContext::unknown()
        },
        (None, Some(location)) => GeoContext {
            country: Some(location.country),
            city: location.city,
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy_m: None,
            source: GeoSource::IpLookup,
        },
        (None, None) => GeoContext::unknown(),
    }
}

/// Loopback, private, link-local and unique-local ranges
pub fn is_local_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_local_address(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::PermissionStatus;

    struct SlowLocator;

    #[async_trait]
    impl IpLocator for SlowLocator {
        async fn locate(&self, _ip: IpAddr) -> GeoResult<IpLocation> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(GeoError::Lookup("unreachable".to_string()))
        }
    }

    fn public_ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn india() -> IpLocation {
        IpLocation {
            country: "IN".to_string(),
            city: Some("Bengaluru".to_string()),
            latitude: Some(12.97),
            longitude: Some(77.59),
        }
    }

    #[test]
    fn test_local_address_detection() {
        for ip in ["127.0.0.1", "10.1.2.3", "172.16.0.9", "192.168.1.1", "::1", "fd00::1"] {
            assert!(is_local_address(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "203.0.113.7", "2001:db8::1"] {
            assert!(!is_local_address(ip.parse().unwrap()), "{ip}");
        }
    }

    #[tokio::test]
    async fn test_private_address_resolves_local_without_lookup() {
        let resolver = GeoResolver::new(Arc::new(SlowLocator), Duration::from_millis(10));
        let resolution = resolver.resolve(Some("192.168.0.4".parse().unwrap()), None).await;

        assert_eq!(resolution.geo.country.as_deref(), Some("LOCAL"));
        assert_eq!(resolution.geo.source, GeoSource::Unknown);
        assert!(resolution.degraded.is_none());
    }

    #[tokio::test]
    async fn test_ip_lookup_fills_context() {
        let locator = StaticIpLocator::new().with_entry(public_ip(), india());
        let resolver = GeoResolver::new(Arc::new(locator), DEFAULT_LOOKUP_TIMEOUT);

        let resolution = resolver.resolve(Some(public_ip()), None).await;
        assert_eq!(resolution.geo.source, GeoSource::IpLookup);
        assert_eq!(resolution.geo.country.as_deref(), Some("IN"));
        assert_eq!(resolution.geo.coordinates(), Some((12.97, 77.59)));
    }

    #[tokio::test]
    async fn test_browser_coordinates_win_and_keep_ip_country() {
        let locator = StaticIpLocator::new().with_entry(public_ip(), india());
        let resolver = GeoResolver::new(Arc::new(locator), DEFAULT_LOOKUP_TIMEOUT);
        let browser = BrowserLocation {
            latitude: Some(13.0),
            longitude: Some(77.6),
            accuracy_m: Some(35.0),
            permission_status: PermissionStatus::Granted,
        };

        let resolution = resolver.resolve(Some(public_ip()), Some(&browser)).await;
        assert_eq!(resolution.geo.source, GeoSource::Browser);
        assert_eq!(resolution.geo.coordinates(), Some((13.0, 77.6)));
        assert_eq!(resolution.geo.country.as_deref(), Some("IN"));
        assert_eq!(resolution.geo.accuracy_m, Some(35.0));
    }

    #[tokio::test]
    async fn test_lookup_timeout_degrades_to_unknown() {
        let resolver = GeoResolver::new(Arc::new(SlowLocator), Duration::from_millis(20));
        let resolution = resolver.resolve(Some(public_ip()), None).await;

        assert_eq!(resolution.geo, GeoContext::unknown());
        let degraded = resolution.degraded.expect("timeout should degrade");
        assert_eq!(degraded.signal, "geo");
        assert!(degraded.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_denied_browser_falls_back_to_lookup_failure() {
        let resolver = GeoResolver::offline();
        let browser = BrowserLocation {
            latitude: Some(13.0),
            longitude: Some(77.6),
            accuracy_m: None,
            permission_status: PermissionStatus::Denied,
        };

        let resolution = resolver.resolve(Some(public_ip()), Some(&browser)).await;
        assert_eq!(resolution.geo.source, GeoSource::Unknown);
        assert!(resolution.geo.coordinates().is_none());
        assert!(resolution.degraded.is_some());
    }
}
