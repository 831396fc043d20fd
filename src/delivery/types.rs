//! Core types for delivery resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::geo::GeoCoordinate;
use crate::zones::DeliveryZone;

/// How a result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Device-reported position.
    Geolocation,
    /// User-entered postal code found in the reference table.
    PostalCode,
    /// Valid postal code with no table entry; Standard tier by default.
    PostalCodeFallback,
    /// Raw latitude/longitude supplied by the caller.
    Coordinates,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geolocation => write!(f, "Location"),
            Self::PostalCode => write!(f, "Pincode"),
            Self::PostalCodeFallback => write!(f, "Pincode (default)"),
            Self::Coordinates => write!(f, "Coordinates"),
        }
    }
}

/// The one canonical outcome every surface reads.
///
/// Built once per resolution and never mutated; shared as
/// `Arc<ResolutionResult>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// `None` only for an unmapped postal code.
    pub distance_km: Option<f64>,
    pub zone: DeliveryZone,
    pub message: String,
    pub is_express_eligible: bool,
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub coordinate: Option<GeoCoordinate>,
    pub source: ResolutionSource,
    pub resolved_at: DateTime<Utc>,
}

impl ResolutionResult {
    /// Two-line banner for terminals.
    pub fn display_line(&self) -> String {
        let place = match (&self.city, &self.postal_code) {
            (Some(city), Some(code)) => format!("{} ({})", city, code),
            (Some(city), None) => city.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => "Your location".to_string(),
        };
        let distance = match self.distance_km {
            Some(d) => format!("{:.1} km from store", d),
            None => "distance unknown".to_string(),
        };
        format!(
            "{} {}: {}\n  {} {} [{}]",
            "\u{1F4CD}", place, distance, self.zone.icon_glyph, self.zone.display_label, self.zone.eta_label
        )
    }
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    AttemptingGeolocation,
    AwaitingManualInput,
    Resolved,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AttemptingGeolocation => write!(f, "attempting geolocation"),
            Self::AwaitingManualInput => write!(f, "awaiting manual input"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Why the automatic path handed over to manual entry.
///
/// None of these are failures the user sees; they only select the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unsupported,
    FallbackTimer,
}

/// What subscribers observe after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: OrchestratorState,
    pub result: Option<Arc<ResolutionResult>>,
    /// Last validation message from manual entry, cleared on success.
    pub error: Option<String>,
    pub fallback: Option<FallbackReason>,
    /// Bumped on every published change.
    pub revision: u64,
}

impl Snapshot {
    pub fn idle() -> Self {
        Self {
            state: OrchestratorState::Idle,
            result: None,
            error: None,
            fallback: None,
            revision: 0,
        }
    }
}

/// Errors surfaced by resolution calls.
///
/// Only [`ResolveError::InvalidPostalCodeFormat`] is meant for the user;
/// the rest describe misuse of the orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("Invalid pincode '{code}': enter 6 digits, not starting with 0")]
    InvalidPostalCodeFormat { code: String },
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(GeoCoordinate),
    #[error("Pincode entry is not open (currently {state})")]
    NotAwaitingInput { state: OrchestratorState },
    #[error("Pincode entry was replaced by a newer location change")]
    Superseded,
    #[error("Delivery resolution was shut down")]
    ShutDown,
}
