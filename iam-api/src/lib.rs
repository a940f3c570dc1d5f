//! iam4apis API - HTTP layer and PostgreSQL backend
//!
//! Exposes the [`iam_storage::IamStore`] facade over a JSON REST API (Axum)
//! and implements its storage trait on PostgreSQL. Callers are identified by
//! the `X-User` header set by an upstream authenticating proxy.

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use bootstrap::seed_admin;
pub use config::{store_config_from_env, DbConfig, ServerConfig};
pub use db::PgStorage;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::Caller;
pub use routes::create_api_router;
pub use state::AppState;
