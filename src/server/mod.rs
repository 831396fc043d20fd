//! HTTP surface over the stateless resolver.
//!
//! Requests never touch the orchestrator or the persisted cache; each one
//! is resolved from scratch.

mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::delivery::resolver::PostalCodeResolver;

pub fn build_router(resolver: PostalCodeResolver) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/api/delivery", get(handlers::delivery_by_postal_code))
        .route("/api/delivery/position", get(handlers::delivery_by_position))
        .route("/api/zones", get(handlers::zone_list))
        .route("/api/pincodes", get(handlers::postal_code_list))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, resolver: PostalCodeResolver) -> std::io::Result<()> {
    let app = build_router(resolver);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "delivery zone server listening");
    eprintln!("  Delivery zone server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}
