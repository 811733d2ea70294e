//! HTTP routes

pub mod health;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{state::AppState, websocket::ws_handler};

/// Create all routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // WebSocket route (auth handled in handler via bearer header or query parameter)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
