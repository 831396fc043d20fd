//! Great-circle geometry for delivery distances.
//!
//! Haversine on a spherical Earth (R = 6371 km). Accuracy is well inside
//! a kilometre for the distances that matter to zone classification.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

const DEG: f64 = PI / 180.0;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both components are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.latitude >= 0.0 { 'N' } else { 'S' };
        let ew = if self.longitude >= 0.0 { 'E' } else { 'W' };
        write!(
            f,
            "{:.4}\u{00B0} {}, {:.4}\u{00B0} {}",
            self.latitude.abs(),
            ns,
            self.longitude.abs(),
            ew
        )
    }
}

/// Great-circle distance between two coordinates, in kilometres.
///
/// Symmetric, zero for identical points, never negative. The `min(1.0)`
/// clamp keeps rounding noise from pushing `asin` out of its domain for
/// near-antipodal points.
pub fn distance_km(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let lat1 = a.latitude * DEG;
    let lat2 = b.latitude * DEG;
    let d_lat = (b.latitude - a.latitude) * DEG;
    let d_lon = (b.longitude - a.longitude) * DEG;

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}
