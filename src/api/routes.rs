//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::middleware::require_identity;
use super::server::AppState;
use super::websocket;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // No auth required
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .route(
            "/ws/classroom/:lecture_id",
            get(websocket::classroom::classroom_ws),
        )
        .nest("/api", protected_routes(state.clone()))
        .with_state(state)
}

/// Routes that require an identity when authentication is enabled
fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Classroom
        .route("/classroom/join", post(handlers::classroom::join_classroom))
        .route(
            "/classroom/:lecture_id/state",
            get(handlers::classroom::classroom_state),
        )
        .route("/stats", get(handlers::classroom::stats))
        // Execution
        .route("/execution/execute", post(handlers::execution::execute_code))
        .route(
            "/execution/result/:id",
            get(handlers::execution::execution_result),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            require_identity,
        ))
}
