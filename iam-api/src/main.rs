//! iam4apis API Server Entry Point
//!
//! Bootstraps configuration, prepares the database, seeds the admin user and
//! starts the Axum HTTP server.

use std::sync::Arc;

use axum::Router;
use iam_api::telemetry::{init_tracing, TelemetryConfig};
use iam_api::{
    create_api_router, seed_admin, store_config_from_env, ApiError, ApiResult, AppState,
    DbConfig, PgStorage, ServerConfig,
};
use iam_storage::IamStore;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let server_config = ServerConfig::from_env()?;
    let addr = server_config.socket_addr()?;

    let db_config = DbConfig::from_env();
    let storage = PgStorage::from_config(&db_config)?;
    storage.ensure_schema().await?;

    let store = IamStore::new(Arc::new(storage), store_config_from_env());
    store.start();

    let admin = seed_admin(&store, &server_config.admin_user).await?;
    tracing::info!(admin = %admin.id, "Admin user ready");

    let app: Router = create_api_router(AppState::new(store.clone()));

    tracing::info!(%addr, "Starting iam4apis API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    let served = tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    store.shutdown().await;
    served
}
