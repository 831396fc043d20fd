//! Device-location providers.
//!
//! A provider answers one position request. The orchestrator always wraps
//! the call in its own timeout, so providers that ignore
//! [`PositionOptions::timeout`] are still bounded.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use super::types::FallbackReason;
use crate::geo::GeoCoordinate;

/// Request options, mirroring the browser geolocation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub timeout: Duration,
    /// A previously obtained fix younger than this may be returned.
    pub maximum_age: Duration,
}

/// Every way a position request can end without a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),
    #[error("position request timed out")]
    Timeout,
    #[error("geolocation is not supported on this platform")]
    Unsupported,
}

impl From<&GeolocationError> for FallbackReason {
    fn from(e: &GeolocationError) -> Self {
        match e {
            GeolocationError::PermissionDenied => Self::PermissionDenied,
            GeolocationError::PositionUnavailable(_) => Self::PositionUnavailable,
            GeolocationError::Timeout => Self::Timeout,
            GeolocationError::Unsupported => Self::Unsupported,
        }
    }
}

#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    /// Resolve one position. Dropping the future abandons the request.
    async fn request_position(&self, options: PositionOptions) -> Result<GeoCoordinate, GeolocationError>;
}

// ─── Last-fix memo ──────────────────────────────────────────────

/// Remembers the last successful fix for `maximum_age` reuse.
#[derive(Debug, Default)]
struct LastFix {
    inner: Mutex<Option<(GeoCoordinate, Instant)>>,
}

impl LastFix {
    fn fresh(&self, maximum_age: Duration) -> Option<GeoCoordinate> {
        let guard = self.inner.lock().ok()?;
        let (coordinate, at) = (*guard)?;
        (at.elapsed() <= maximum_age).then_some(coordinate)
    }

    fn record(&self, coordinate: GeoCoordinate) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some((coordinate, Instant::now()));
        }
    }
}

// ─── IP-based geolocation ───────────────────────────────────────

const DEFAULT_IP_ENDPOINT: &str = "https://ipapi.co/json/";

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Coarse device location from the public IP address.
///
/// Used by the command-line surface, which has no GPS. The HTTP call runs
/// on the blocking pool.
#[derive(Debug)]
pub struct IpGeolocationProvider {
    endpoint: String,
    last_fix: LastFix,
}

impl IpGeolocationProvider {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_IP_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            last_fix: LastFix::default(),
        }
    }
}

impl Default for IpGeolocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeolocationProvider for IpGeolocationProvider {
    async fn request_position(&self, options: PositionOptions) -> Result<GeoCoordinate, GeolocationError> {
        if let Some(coordinate) = self.last_fix.fresh(options.maximum_age) {
            debug!(%coordinate, "reusing recent IP fix");
            return Ok(coordinate);
        }

        let endpoint = self.endpoint.clone();
        let coordinate = tokio::task::spawn_blocking(move || ip_lookup(&endpoint, options.timeout))
            .await
            .map_err(|e| GeolocationError::PositionUnavailable(e.to_string()))??;

        self.last_fix.record(coordinate);
        Ok(coordinate)
    }
}

fn ip_lookup(endpoint: &str, timeout: Duration) -> Result<GeoCoordinate, GeolocationError> {
    let response = ureq::get(endpoint)
        .set("User-Agent", "DeliveryZones/0.3")
        .timeout(timeout)
        .call()
        .map_err(|e| match e {
            ureq::Error::Status(401 | 403, _) => GeolocationError::PermissionDenied,
            other => GeolocationError::PositionUnavailable(other.to_string()),
        })?;

    let r: IpApiResult = response
        .into_json()
        .map_err(|e| GeolocationError::PositionUnavailable(e.to_string()))?;

    if r.error {
        return Err(GeolocationError::PositionUnavailable(
            r.reason.unwrap_or_else(|| "provider error".into()),
        ));
    }

    let latitude = r
        .latitude
        .ok_or_else(|| GeolocationError::PositionUnavailable("no latitude".into()))?;
    let longitude = r
        .longitude
        .ok_or_else(|| GeolocationError::PositionUnavailable("no longitude".into()))?;

    let coordinate = GeoCoordinate::new(latitude, longitude);
    if !coordinate.is_valid() {
        return Err(GeolocationError::PositionUnavailable(format!("bad fix {}", coordinate)));
    }
    Ok(coordinate)
}
