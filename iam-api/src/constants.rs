//! Constants for the iam4apis API
//!
//! Defaults for every environment-driven setting live here so they are easy
//! to find and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Default listening port
pub const DEFAULT_PORT: u16 = 4300;

/// Header carrying the caller's user id, set by the upstream gateway
pub const CALLER_HEADER: &str = "x-user";

// ============================================================================
// DATABASE
// ============================================================================

/// Default PostgreSQL host
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default database, user and password name
pub const DEFAULT_DB_NAME: &str = "iam4apis";

/// Default maximum pool size
pub const DEFAULT_DB_POOL_SIZE: usize = 16;

/// Default connection wait timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "iam_api=debug,iam_storage=info,tower_http=info,info";
