//! Tracing subscriber initialization.
//!
//! Structured logs go to stdout, either as JSON lines for log shippers or as
//! human-readable text for local runs. Verbosity follows `RUST_LOG` when set.

use crate::constants::DEFAULT_LOG_FILTER;
use crate::error::{ApiError, ApiResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log line format (`IAM_LOG_FORMAT=json` for JSON lines)
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
    /// Service name attached to the startup line
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            service_name: "iam-api".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("IAM_LOG_FORMAT") {
            config.format = LogFormat::parse(&raw);
        }
        config
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once at startup, before any span is created. A second call
/// fails rather than replacing the installed subscriber.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        format = ?config.format,
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );

    Ok(())
}
