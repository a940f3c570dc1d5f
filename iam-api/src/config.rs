//! Environment-driven configuration.
//!
//! Every setting has a default except the bootstrap admin, which must be
//! provided. Each `from_env` has a `from_vars` twin taking a lookup function
//! so tests do not touch the process environment.

use crate::constants::{
    DEFAULT_BIND, DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_PORT,
    DEFAULT_DB_TIMEOUT_SECS, DEFAULT_PORT,
};
use crate::error::{ApiError, ApiResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use iam_core::{ConfigError, UserId};
use iam_storage::{EventTailConfig, StoreConfig, UserCacheConfig};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::NoTls;

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse `key` if set, falling back to `default` when unset or malformed.
fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

// ============================================================================
// DATABASE
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection wait timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_NAME.to_string(),
            password: DEFAULT_DB_NAME.to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `IAM_DB_HOST` (default: localhost)
    /// - `IAM_DB_PORT` (default: 5432)
    /// - `IAM_DB_NAME`, `IAM_DB_USER`, `IAM_DB_PASSWORD` (default: iam4apis)
    /// - `IAM_DB_POOL_SIZE` (default: 16)
    /// - `IAM_DB_TIMEOUT` in seconds (default: 30)
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("IAM_DB_HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "IAM_DB_PORT", defaults.port),
            dbname: lookup("IAM_DB_NAME").unwrap_or(defaults.dbname),
            user: lookup("IAM_DB_USER").unwrap_or(defaults.user),
            password: lookup("IAM_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: parse_or(&lookup, "IAM_DB_POOL_SIZE", defaults.max_size),
            timeout: Duration::from_secs(parse_or(&lookup, "IAM_DB_TIMEOUT", DEFAULT_DB_TIMEOUT_SECS)),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// SERVER
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// User guaranteed to exist with `admin` on `/` after startup
    pub admin_user: UserId,
}

impl ServerConfig {
    /// Create the server configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `IAM_API_BIND` (default: 0.0.0.0)
    /// - `PORT`, then `IAM_API_PORT` (default: 4300)
    /// - `IAM_ADMIN_USER` (required)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = lookup("IAM_API_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());

        let port = match lookup("PORT").or_else(|| lookup("IAM_API_PORT")) {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let admin_user = lookup("IAM_ADMIN_USER")
            .map(UserId::from)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "IAM_ADMIN_USER".to_string(),
            })?;

        Ok(Self {
            bind,
            port,
            admin_user,
        })
    }

    /// Socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "IAM_API_BIND".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Build the store configuration from environment variables.
///
/// # Environment Variables
/// - `IAM_CACHE_CAPACITY` (default: 1000)
/// - `IAM_PAGE_SIZE` (default: 100)
/// - `IAM_EVENT_TAIL_CAPACITY` (default: 50)
/// - `IAM_EVENT_REFRESH_SECS` (default: 5)
/// - `IAM_EVENT_HORIZON_HOURS` (default: 24)
pub fn store_config_from_env() -> StoreConfig {
    store_config_from_vars(env_lookup)
}

pub fn store_config_from_vars(lookup: impl Fn(&str) -> Option<String>) -> StoreConfig {
    let defaults = StoreConfig::default();
    let tail = defaults.event_tail;

    let cache = UserCacheConfig::new()
        .with_capacity(parse_or(&lookup, "IAM_CACHE_CAPACITY", defaults.cache.capacity));

    let refresh_secs = parse_or(&lookup, "IAM_EVENT_REFRESH_SECS", tail.refresh_interval.as_secs());
    let horizon_hours = parse_or(&lookup, "IAM_EVENT_HORIZON_HOURS", tail.horizon.num_hours());
    let event_tail = EventTailConfig::new()
        .with_capacity(parse_or(&lookup, "IAM_EVENT_TAIL_CAPACITY", tail.capacity))
        .with_refresh_interval(Duration::from_secs(refresh_secs.max(1)))
        .with_horizon(chrono::Duration::try_hours(horizon_hours).unwrap_or(tail.horizon))
        .with_max_catch_up_batches(tail.max_catch_up_batches);

    StoreConfig::new()
        .with_page_size(parse_or(&lookup, "IAM_PAGE_SIZE", defaults.page_size))
        .with_cache(cache)
        .with_event_tail(event_tail)
}
