//! API route definitions.

use crate::handlers;
use crate::ApiState;
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// Build the API router.
pub fn create_router(state: ApiState, timeout_secs: u64) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/findings", get(handlers::list_findings))
        .route("/api/v1/findings/{id}", get(handlers::get_finding))
        .route(
            "/api/v1/findings/{id}/approve",
            post(handlers::approve_finding),
        )
        .route("/api/v1/agents", get(handlers::agent_health))
        .layer(TimeoutLayer::new(Duration::from_secs(timeout_secs.max(1))))
        .with_state(state)
}
