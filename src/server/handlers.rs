use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::delivery::types::{ResolutionResult, ResolutionSource, ResolveError};
use crate::geo::{distance_km, GeoCoordinate};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        let status = match &e {
            ResolveError::InvalidPostalCodeFormat { .. } | ResolveError::InvalidCoordinates(_) => {
                StatusCode::BAD_REQUEST
            }
            ResolveError::NotAwaitingInput { .. } | ResolveError::Superseded => StatusCode::CONFLICT,
            ResolveError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        api_error(status, e.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        api_error(StatusCode::BAD_REQUEST, e.body_text())
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ─── GET /api/delivery ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct PostalCodeQuery {
    pub pincode: Option<String>,
}

pub async fn delivery_by_postal_code(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PostalCodeQuery>, QueryRejection>,
) -> Result<Json<ResolutionResult>, ApiError> {
    let start = Instant::now();
    let Query(params) = query?;

    let code = params.pincode.as_deref().unwrap_or("").trim();
    if code.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'pincode' parameter"));
    }

    let result = state.resolver.resolve_by_postal_code(code)?;

    info!(
        pincode = code,
        zone = %result.zone.id,
        elapsed_ms = elapsed_ms(start),
        "GET /api/delivery"
    );
    Ok(Json(result))
}

// ─── GET /api/delivery/position ──────────────────────────────────

#[derive(Deserialize)]
pub struct PositionQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub async fn delivery_by_position(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PositionQuery>, QueryRejection>,
) -> Result<Json<ResolutionResult>, ApiError> {
    let start = Instant::now();
    let Query(params) = query?;

    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Provide both 'lat' and 'lon' parameters"));
    };

    let result = state
        .resolver
        .resolve_by_position(GeoCoordinate::new(lat, lon), ResolutionSource::Coordinates)?;

    info!(
        lat,
        lon,
        zone = %result.zone.id,
        elapsed_ms = elapsed_ms(start),
        "GET /api/delivery/position"
    );
    Ok(Json(result))
}

// ─── GET /api/zones ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct ZoneInfo {
    pub id: String,
    pub from_km: f64,
    /// `None` for the catch-all tier.
    pub to_km: Option<f64>,
    pub eta_label: String,
    pub display_label: String,
    pub icon_glyph: String,
    pub express: bool,
}

pub async fn zone_list(State(state): State<Arc<AppState>>) -> Json<Vec<ZoneInfo>> {
    let zones = state.resolver.zones();
    let express_id = &zones.express().id;
    Json(
        zones
            .ranges()
            .map(|(from, to, zone)| ZoneInfo {
                id: zone.id.clone(),
                from_km: from,
                to_km: to.is_finite().then_some(to),
                eta_label: zone.eta_label.clone(),
                display_label: zone.display_label.clone(),
                icon_glyph: zone.icon_glyph.clone(),
                express: &zone.id == express_id,
            })
            .collect(),
    )
}

// ─── GET /api/pincodes ───────────────────────────────────────────

#[derive(Serialize)]
pub struct PostalCodeInfo {
    pub code: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub zone: String,
}

pub async fn postal_code_list(State(state): State<Arc<AppState>>) -> Json<Vec<PostalCodeInfo>> {
    let resolver = &state.resolver;
    let mut list: Vec<PostalCodeInfo> = resolver
        .table()
        .records()
        .into_iter()
        .map(|record| {
            let distance = distance_km(resolver.depot(), record.coordinate);
            PostalCodeInfo {
                zone: resolver.zones().classify(distance).id.clone(),
                code: record.code,
                city: record.city,
                latitude: record.coordinate.latitude,
                longitude: record.coordinate.longitude,
                distance_km: distance,
            }
        })
        .collect();
    list.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    Json(list)
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use crate::delivery::resolver::PostalCodeResolver;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(PostalCodeResolver::builtin())
    }

    async fn get(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_delivery_by_pincode() {
        let (status, json) = get("/api/delivery?pincode=302004").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["zone"]["id"], "express");
        assert_eq!(json["is_express_eligible"], true);
        assert_eq!(json["source"], "postal_code");
        assert_eq!(json["city"], "Jaipur");
    }

    #[tokio::test]
    async fn test_unknown_pincode_is_standard() {
        let (status, json) = get("/api/delivery?pincode=999999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["zone"]["id"], "standard");
        assert!(json["distance_km"].is_null());
        assert_eq!(json["source"], "postal_code_fallback");
    }

    #[tokio::test]
    async fn test_invalid_pincode_is_400() {
        let (status, json) = get("/api/delivery?pincode=012345").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
        assert!(json["error"].as_str().unwrap().contains("012345"));
    }

    #[tokio::test]
    async fn test_missing_pincode_is_400() {
        let (status, json) = get("/api/delivery").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("pincode"));
    }

    #[tokio::test]
    async fn test_delivery_by_position() {
        let (status, json) = get("/api/delivery/position?lat=26.9124&lon=75.7873").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["zone"]["id"], "express");
        assert_eq!(json["distance_km"], 0.0);
        assert_eq!(json["source"], "coordinates");
    }

    #[tokio::test]
    async fn test_position_out_of_range() {
        let (status, json) = get("/api/delivery/position?lat=91&lon=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
    }

    #[tokio::test]
    async fn test_position_not_a_number() {
        let (status, json) = get("/api/delivery/position?lat=north&lon=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
    }

    #[tokio::test]
    async fn test_zone_list() {
        let (status, json) = get("/api/zones").await;
        assert_eq!(status, StatusCode::OK);
        let zones = json.as_array().unwrap();
        assert_eq!(zones.len(), 4);
        assert_eq!(zones[0]["id"], "express");
        assert_eq!(zones[0]["from_km"], 0.0);
        assert_eq!(zones[0]["to_km"], 15.0);
        assert_eq!(zones[0]["express"], true);
        assert_eq!(zones[1]["from_km"], 15.0);
        assert!(zones[3]["to_km"].is_null());
    }

    #[tokio::test]
    async fn test_pincode_list_sorted_by_distance() {
        let (status, json) = get("/api/pincodes").await;
        assert_eq!(status, StatusCode::OK);
        let list = json.as_array().unwrap();
        assert!(!list.is_empty());
        assert_eq!(list[0]["code"], "302001");
        let distances: Vec<f64> = list.iter().map(|e| e["distance_km"].as_f64().unwrap()).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }
}
