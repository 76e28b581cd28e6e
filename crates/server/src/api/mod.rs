//! HTTP API layer built on Axum.
//!
//! Two endpoints mirror the engine facade: `POST /insert` and
//! `POST /search`. Status is carried in the response body (`code` field)
//! rather than the HTTP status line, so clients switch on one integer.

/// HTTP request handlers and application state.
pub mod handlers;
/// Request and response data transfer objects.
pub mod models;

use axum::routing::post;
use axum::Router;
use handlers::AppState;

/// Builds the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/insert", post(handlers::insert))
        .route("/search", post(handlers::search))
        .with_state(state)
}
