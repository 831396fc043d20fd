//! Delivery tiers and distance classification.
//!
//! A [`ZoneTable`] is an ordered list of tiers whose inclusive upper bounds
//! partition `[0, ∞)`. Tables are validated on construction, so a gap,
//! a reordered bound or a missing catch-all is rejected before anything is
//! classified against it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use thiserror::Error;

pub const EXPRESS: &str = "express";
pub const SAME_DAY: &str = "same_day";
pub const NEXT_DAY: &str = "next_day";
pub const STANDARD: &str = "standard";

/// One delivery-speed tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
    pub id: String,
    /// Inclusive upper bound in km. `f64::INFINITY` marks the catch-all and
    /// is written as `null` in JSON.
    #[serde(with = "upper_bound", default = "unbounded")]
    pub radius_km_upper_bound: f64,
    pub eta_label: String,
    pub display_label: String,
    pub icon_glyph: String,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

impl DeliveryZone {
    pub fn new(id: &str, upper_bound_km: f64, eta: &str, display: &str, icon: &str) -> Self {
        Self {
            id: id.to_string(),
            radius_km_upper_bound: upper_bound_km,
            eta_label: eta.to_string(),
            display_label: display.to_string(),
            icon_glyph: icon.to_string(),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.radius_km_upper_bound == f64::INFINITY
    }
}

mod upper_bound {
    use super::*;

    pub fn serialize<S: Serializer>(bound: &f64, s: S) -> Result<S::Ok, S::Error> {
        if bound.is_infinite() {
            s.serialize_none()
        } else {
            s.serialize_some(bound)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}

/// Reasons a zone list does not partition `[0, ∞)`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZoneTableError {
    #[error("zone table is empty")]
    Empty,
    #[error("zone '{id}' has an invalid upper bound ({bound}); bounds must be positive")]
    InvalidBound { id: String, bound: f64 },
    #[error("zone '{id}' ({bound} km) does not extend past the previous zone ({previous} km)")]
    NotAscending { id: String, bound: f64, previous: f64 },
    #[error("zone table has no unbounded catch-all as its last zone")]
    MissingCatchAll,
    #[error("unbounded zone '{id}' must be the last zone")]
    CatchAllNotLast { id: String },
    #[error("zone id '{0}' appears more than once")]
    DuplicateId(String),
}

/// Validated, immutable, ascending list of delivery zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DeliveryZone>", into = "Vec<DeliveryZone>")]
pub struct ZoneTable {
    zones: Vec<DeliveryZone>,
}

impl ZoneTable {
    /// Build a table, enforcing the partition invariant.
    pub fn new(zones: Vec<DeliveryZone>) -> Result<Self, ZoneTableError> {
        if zones.is_empty() {
            return Err(ZoneTableError::Empty);
        }

        let mut seen = HashSet::new();
        let mut previous = 0.0_f64;
        let last = zones.len() - 1;

        for (i, zone) in zones.iter().enumerate() {
            if !seen.insert(zone.id.as_str()) {
                return Err(ZoneTableError::DuplicateId(zone.id.clone()));
            }

            let bound = zone.radius_km_upper_bound;
            if bound.is_nan() || bound <= 0.0 {
                return Err(ZoneTableError::InvalidBound { id: zone.id.clone(), bound });
            }
            if zone.is_catch_all() && i != last {
                return Err(ZoneTableError::CatchAllNotLast { id: zone.id.clone() });
            }
            if i > 0 && bound <= previous {
                return Err(ZoneTableError::NotAscending {
                    id: zone.id.clone(),
                    bound,
                    previous,
                });
            }
            previous = bound;
        }

        if !zones[last].is_catch_all() {
            return Err(ZoneTableError::MissingCatchAll);
        }

        Ok(Self { zones })
    }

    /// Express ≤15 km, Same-Day ≤30 km, Next-Day ≤100 km, Standard beyond.
    pub fn reference() -> Self {
        Self {
            zones: vec![
                DeliveryZone::new(EXPRESS, 15.0, "2-3 hours", "Express Delivery", "\u{26A1}"),
                DeliveryZone::new(SAME_DAY, 30.0, "Same Day", "Same Day Delivery", "\u{1F680}"),
                DeliveryZone::new(NEXT_DAY, 100.0, "1-2 days", "Next Day Delivery", "\u{1F69A}"),
                DeliveryZone::new(STANDARD, f64::INFINITY, "3-5 days", "Standard Delivery", "\u{1F4E6}"),
            ],
        }
    }

    /// First zone whose inclusive upper bound covers `distance_km`.
    ///
    /// Negative input lands in the tightest zone; NaN lands in the catch-all.
    pub fn classify(&self, distance_km: f64) -> &DeliveryZone {
        self.zones
            .iter()
            .find(|z| distance_km <= z.radius_km_upper_bound)
            .unwrap_or_else(|| self.catch_all())
    }

    /// The tightest tier.
    pub fn express(&self) -> &DeliveryZone {
        &self.zones[0]
    }

    /// The unbounded tier, always last.
    pub fn catch_all(&self) -> &DeliveryZone {
        &self.zones[self.zones.len() - 1]
    }

    pub fn is_express_eligible(&self, distance_km: f64) -> bool {
        distance_km <= self.express().radius_km_upper_bound
    }

    pub fn get(&self, id: &str) -> Option<&DeliveryZone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn zones(&self) -> &[DeliveryZone] {
        &self.zones
    }

    /// Each zone with the half-open interval `(lower, upper]` it owns.
    /// The first zone also owns `0.0` itself.
    pub fn ranges(&self) -> impl Iterator<Item = (f64, f64, &DeliveryZone)> {
        let lowers = std::iter::once(0.0).chain(self.zones.iter().map(|z| z.radius_km_upper_bound));
        lowers
            .zip(self.zones.iter())
            .map(|(lower, zone)| (lower, zone.radius_km_upper_bound, zone))
    }
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self::reference()
    }
}

impl TryFrom<Vec<DeliveryZone>> for ZoneTable {
    type Error = ZoneTableError;

    fn try_from(zones: Vec<DeliveryZone>) -> Result<Self, Self::Error> {
        Self::new(zones)
    }
}

impl From<ZoneTable> for Vec<DeliveryZone> {
    fn from(table: ZoneTable) -> Self {
        table.zones
    }
}
