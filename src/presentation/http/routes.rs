//! Route Configuration
//!
//! Configures the gateway upgrade route, health and metrics endpoints, and the
//! internal collaborator API.

use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::internal_auth_middleware;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // WebSocket gateway endpoint
        .route("/gateway", get(ws_handler))
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .nest("/internal", internal_routes(state.clone()))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

/// Collaborator routes (internal token required)
fn internal_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/events", post(handlers::events::publish_event))
        .route(
            "/users/{user_id}/invalidate",
            post(handlers::events::invalidate_user),
        )
        .route_layer(middleware::from_fn_with_state(state, internal_auth_middleware))
}
