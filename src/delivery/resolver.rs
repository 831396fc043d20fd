//! Postal-code and coordinate resolution.
//!
//! Pincode flow:  validate → table lookup → distance from depot → classify
//!                (unmapped but valid → catch-all tier, no distance)
//! Position flow: range check → distance from depot → classify

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::table::{BuiltinTable, PostalCodeTable, DEPOT};
use super::types::{ResolutionResult, ResolutionSource, ResolveError};
use crate::geo::{distance_km, GeoCoordinate};
use crate::zones::{DeliveryZone, ZoneTable};

/// `^[1-9][0-9]{5}$`
pub fn is_valid_postal_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 6 && bytes[0] != b'0' && bytes.iter().all(u8::is_ascii_digit)
}

/// Synchronous, deterministic resolver. Latency simulation belongs to the
/// caller.
#[derive(Clone)]
pub struct PostalCodeResolver {
    table: Arc<dyn PostalCodeTable>,
    zones: ZoneTable,
    depot: GeoCoordinate,
}

impl PostalCodeResolver {
    pub fn new(table: Arc<dyn PostalCodeTable>, zones: ZoneTable, depot: GeoCoordinate) -> Self {
        Self { table, zones, depot }
    }

    /// Built-in table, reference zones, Jaipur depot.
    pub fn builtin() -> Self {
        Self::new(Arc::new(BuiltinTable), ZoneTable::reference(), DEPOT)
    }

    pub fn zones(&self) -> &ZoneTable {
        &self.zones
    }

    pub fn table(&self) -> &dyn PostalCodeTable {
        self.table.as_ref()
    }

    pub fn depot(&self) -> GeoCoordinate {
        self.depot
    }

    /// Resolve a user-entered pincode. Surrounding whitespace is ignored.
    pub fn resolve_by_postal_code(&self, code: &str) -> Result<ResolutionResult, ResolveError> {
        let code = code.trim();
        if !is_valid_postal_code(code) {
            return Err(ResolveError::InvalidPostalCodeFormat { code: code.to_string() });
        }

        let Some(record) = self.table.lookup(code) else {
            debug!(code, "pincode not in table, using catch-all tier");
            return Ok(self.fallback_result(code));
        };

        let distance = distance_km(self.depot, record.coordinate);
        let zone = self.zones.classify(distance);
        debug!(code, city = %record.city, distance, zone = %zone.id, "pincode resolved");

        Ok(ResolutionResult {
            distance_km: Some(distance),
            zone: zone.clone(),
            message: city_message(zone, &record.city),
            is_express_eligible: self.zones.is_express_eligible(distance),
            city: Some(record.city),
            postal_code: Some(code.to_string()),
            coordinate: Some(record.coordinate),
            source: ResolutionSource::PostalCode,
            resolved_at: Utc::now(),
        })
    }

    /// Resolve a device or user supplied coordinate.
    pub fn resolve_by_position(
        &self,
        coordinate: GeoCoordinate,
        source: ResolutionSource,
    ) -> Result<ResolutionResult, ResolveError> {
        if !coordinate.is_valid() {
            return Err(ResolveError::InvalidCoordinates(coordinate));
        }

        let distance = distance_km(self.depot, coordinate);
        let zone = self.zones.classify(distance);
        debug!(%coordinate, distance, zone = %zone.id, "position resolved");

        Ok(ResolutionResult {
            distance_km: Some(distance),
            zone: zone.clone(),
            message: distance_message(zone, distance),
            is_express_eligible: self.zones.is_express_eligible(distance),
            city: None,
            postal_code: None,
            coordinate: Some(coordinate),
            source,
            resolved_at: Utc::now(),
        })
    }

    fn fallback_result(&self, code: &str) -> ResolutionResult {
        let zone = self.zones.catch_all();
        ResolutionResult {
            distance_km: None,
            zone: zone.clone(),
            message: city_message(zone, code),
            is_express_eligible: false,
            city: None,
            postal_code: Some(code.to_string()),
            coordinate: None,
            source: ResolutionSource::PostalCodeFallback,
            resolved_at: Utc::now(),
        }
    }
}

fn city_message(zone: &DeliveryZone, place: &str) -> String {
    format!("{} {} to {}: {}", zone.icon_glyph, zone.display_label, place, zone.eta_label)
}

fn distance_message(zone: &DeliveryZone, distance: f64) -> String {
    format!(
        "{} {} ({:.1} km away): {}",
        zone.icon_glyph, zone.display_label, distance, zone.eta_label
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::{EXPRESS, NEXT_DAY, SAME_DAY, STANDARD};

    #[test]
    fn test_validation() {
        assert!(is_valid_postal_code("302001"));
        assert!(is_valid_postal_code("999999"));
        assert!(!is_valid_postal_code("012345"));
        assert!(!is_valid_postal_code("12A456"));
        assert!(!is_valid_postal_code("30200"));
        assert!(!is_valid_postal_code("3020011"));
        assert!(!is_valid_postal_code(""));
        assert!(!is_valid_postal_code("３０２００１"));
    }

    #[test]
    fn test_depot_code() {
        let r = PostalCodeResolver::builtin().resolve_by_postal_code("302001").unwrap();
        assert_eq!(r.city.as_deref(), Some("Jaipur"));
        assert!(r.is_express_eligible);
        assert_eq!(r.distance_km, Some(0.0));
        assert_eq!(r.zone.id, EXPRESS);
        assert_eq!(r.source, ResolutionSource::PostalCode);
        assert!(r.message.contains("Jaipur"));
        assert!(r.message.contains("2-3 hours"));
    }

    #[test]
    fn test_tiers_from_table() {
        let resolver = PostalCodeResolver::builtin();
        let tier = |code: &str| resolver.resolve_by_postal_code(code).unwrap().zone.id;
        assert_eq!(tier("302004"), EXPRESS);
        assert_eq!(tier("303007"), SAME_DAY);
        assert_eq!(tier("304001"), NEXT_DAY);
        assert_eq!(tier("110001"), STANDARD);
    }

    #[test]
    fn test_unknown_code_falls_back() {
        let r = PostalCodeResolver::builtin().resolve_by_postal_code("999999").unwrap();
        assert_eq!(r.distance_km, None);
        assert_eq!(r.city, None);
        assert!(!r.is_express_eligible);
        assert!(r.message.contains("3-5 days"));
        assert_eq!(r.zone.id, STANDARD);
        assert_eq!(r.postal_code.as_deref(), Some("999999"));
        assert_eq!(r.source, ResolutionSource::PostalCodeFallback);
    }

    #[test]
    fn test_malformed_codes() {
        let resolver = PostalCodeResolver::builtin();
        for code in ["12A456", "012345"] {
            let err = resolver.resolve_by_postal_code(code).unwrap_err();
            assert_eq!(err, ResolveError::InvalidPostalCodeFormat { code: code.into() });
        }
    }

    #[test]
    fn test_whitespace_trimmed() {
        let r = PostalCodeResolver::builtin().resolve_by_postal_code(" 302001\n").unwrap();
        assert_eq!(r.postal_code.as_deref(), Some("302001"));
    }

    #[test]
    fn test_position() {
        let resolver = PostalCodeResolver::builtin();
        let r = resolver
            .resolve_by_position(GeoCoordinate::new(26.93, 75.80), ResolutionSource::Geolocation)
            .unwrap();
        assert_eq!(r.zone.id, EXPRESS);
        assert!(r.is_express_eligible);
        assert!(r.city.is_none());
        assert!(r.message.contains("km away"));

        let far = resolver
            .resolve_by_position(GeoCoordinate::new(18.9388, 72.8354), ResolutionSource::Coordinates)
            .unwrap();
        assert_eq!(far.zone.id, STANDARD);
        assert!(!far.is_express_eligible);
        assert_eq!(far.source, ResolutionSource::Coordinates);
    }

    #[test]
    fn test_position_out_of_range() {
        let err = PostalCodeResolver::builtin()
            .resolve_by_position(GeoCoordinate::new(120.0, 75.0), ResolutionSource::Coordinates)
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidCoordinates(_)));
    }

    #[test]
    fn test_custom_depot_and_zones() {
        let zones = ZoneTable::new(vec![
            DeliveryZone::new("near", 5.0, "1 hour", "Near", "n"),
            DeliveryZone::new("far", f64::INFINITY, "1 week", "Far", "f"),
        ])
        .unwrap();
        let resolver = PostalCodeResolver::new(Arc::new(BuiltinTable), zones, GeoCoordinate::new(28.6139, 77.2090));
        assert_eq!(resolver.resolve_by_postal_code("110001").unwrap().zone.id, "near");
        assert_eq!(resolver.resolve_by_postal_code("302001").unwrap().zone.id, "far");
        assert!(resolver.resolve_by_postal_code("999999").unwrap().message.contains("1 week"));
    }
}
