//! Login geolocation: browser coordinates, IP lookup, and distance helpers.

pub mod models;
pub mod resolver;

pub use models::{
    BrowserLocation, GeoContext, GeoSource, IpLocation, LOCAL_COUNTRY, PermissionStatus,
    UNKNOWN_COUNTRY, haversine_km, is_comparable_country,
};
pub use resolver::{
    DEFAULT_LOOKUP_TIMEOUT, DEFAULT_LOOKUP_URL, GeoResolver, HttpIpLocator, IpLocator, Resolution,
    StaticIpLocator, is_local_address,
};

use std::{net::IpAddr, time::Duration};
use thiserror::Error;

use crate::error::ErrorKind;

/// Geolocation errors. These never reach a client; the resolver turns them
/// into degraded signals.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup refused: {0}")]
    Lookup(String),

    #[error("no location known for {0}")]
    NotFound(IpAddr),
}

impl GeoError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub type GeoResult<T> = Result<T, GeoError>;
