//! Audit event history.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use iam_core::{AdminEvent, Timestamp};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// RFC 3339 instant; events strictly after it are returned
    pub from: Option<Timestamp>,
}

/// GET /api/v1/events - Role edits after `from`, oldest first
///
/// Without `from`, returns what happened within the configured horizon.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<AdminEvent>>> {
    let events = state.store.events(query.from).await?;
    Ok(Json(events))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(list_events))
}
