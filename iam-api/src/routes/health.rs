//! Health Check Endpoint
//!
//! Liveness plus a snapshot of the in-process caches. No caller required.

use axum::{extract::State, routing::get, Json, Router};
use iam_storage::{CacheStats, EventTailSnapshot};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub cache: CacheStats,
    pub event_tail: EventTailHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventTailHealth {
    pub running: bool,
    pub window_len: usize,
    #[serde(flatten)]
    pub metrics: EventTailSnapshot,
}

/// GET /health
///
/// Reports `degraded` when the event tail worker is not running; reads still
/// work then, but history goes stale.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let tail = state.store.event_tail();
    let running = tail.is_running();
    let event_tail = EventTailHealth {
        running,
        window_len: tail.snapshot().await.len(),
        metrics: tail.metrics().snapshot(),
    };

    Json(HealthResponse {
        status: if running {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cache: state.store.cache_stats(),
        event_tail,
    })
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(health))
}
