//! REST API Routes Module
//!
//! ```text
//! /health                         liveness and cache statistics
//! /api/v1/users                   list, search, read, role and profile edits
//! /api/v1/login                   record an access by the caller
//! /api/v1/events                  audit history
//! ```

pub mod events;
pub mod health;
pub mod users;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete application router.
pub fn create_api_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .nest("/users", users::create_router())
        .nest("/events", events::create_router())
        .merge(users::create_session_router());

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
