//! PostgreSQL Backend
//!
//! [`PgStorage`] implements [`IamStorage`] on top of a deadpool-postgres
//! connection pool. Two tables back the store:
//!
//! - `users`: one row per user, roles stored as a JSONB array
//! - `admin_events`: append-only audit trail of role edits
//!
//! Role edits run in a single transaction so the user row and its audit
//! event commit together. Every driver or pool failure is logged here and
//! surfaces as [`IamError::BackendUnavailable`] without the driver detail.

use crate::config::DbConfig;
use crate::error::ApiResult;
use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use iam_core::{AdminEvent, EditUser, IamError, IamResult, Role, Timestamp, User, UserId};
use iam_storage::{EventCursor, IamStorage};
use tokio_postgres::types::Json;
use tokio_postgres::Row;

/// Table and index definitions, applied idempotently at startup.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    active        BOOLEAN NOT NULL DEFAULT FALSE,
    display_name  TEXT,
    profile       TEXT,
    first_access  TIMESTAMPTZ,
    last_access   TIMESTAMPTZ,
    roles         JSONB NOT NULL DEFAULT '[]'::jsonb
);

CREATE TABLE IF NOT EXISTS admin_events (
    id        BIGSERIAL PRIMARY KEY,
    ts        TIMESTAMPTZ NOT NULL,
    admin_id  TEXT NOT NULL REFERENCES users(id),
    user_id   TEXT NOT NULL REFERENCES users(id),
    roles     JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS admin_events_ts_idx ON admin_events (ts, id);
"#;

const USER_COLUMNS: &str = "id, active, display_name, profile, first_access, last_access, roles";
const EVENT_COLUMNS: &str = "id, ts, admin_id, user_id, roles";

/// Map a driver error to the store error, logging the detail.
fn backend_error(err: tokio_postgres::Error) -> IamError {
    tracing::error!(error = %err, "database error");
    IamError::backend("database error")
}

/// Map a pool checkout error to the store error, logging the detail.
fn pool_error(err: PoolError) -> IamError {
    tracing::error!(error = %err, "database pool error");
    IamError::backend("database connection unavailable")
}

/// Escape LIKE metacharacters and append the prefix wildcard.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn user_from_row(row: &Row) -> IamResult<User> {
    let id: String = row.try_get("id").map_err(backend_error)?;
    let Json(roles): Json<Vec<Role>> = row.try_get("roles").map_err(backend_error)?;
    Ok(User {
        id: UserId::new(id),
        active: row.try_get("active").map_err(backend_error)?,
        roles,
        display_name: row.try_get("display_name").map_err(backend_error)?,
        profile: row.try_get("profile").map_err(backend_error)?,
        first_access: row.try_get("first_access").map_err(backend_error)?,
        last_access: row.try_get("last_access").map_err(backend_error)?,
    })
}

fn event_from_row(row: &Row) -> IamResult<AdminEvent> {
    let admin: String = row.try_get("admin_id").map_err(backend_error)?;
    let user: String = row.try_get("user_id").map_err(backend_error)?;
    let Json(roles): Json<Vec<Role>> = row.try_get("roles").map_err(backend_error)?;
    Ok(AdminEvent {
        id: row.try_get("id").map_err(backend_error)?,
        ts: row.try_get("ts").map_err(backend_error)?,
        admin: UserId::new(admin),
        user: UserId::new(user),
        roles,
    })
}

// ============================================================================
// STORAGE
// ============================================================================

/// PostgreSQL-backed [`IamStorage`].
#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    /// Create a new storage backend with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new storage backend from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    async fn get_conn(&self) -> IamResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> IamResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(backend_error)?;
        Ok(())
    }

    /// Create the tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> IamResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(backend_error)?;
        tracing::info!("database schema ready");
        Ok(())
    }
}

impl std::fmt::Debug for PgStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgStorage")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

#[async_trait]
impl IamStorage for PgStorage {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    async fn user_get(&self, id: &UserId) -> IamResult<Option<User>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&id.as_str()])
            .await
            .map_err(backend_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_list(&self, after: Option<&UserId>, limit: usize) -> IamResult<Vec<User>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM users WHERE ($1::text IS NULL OR id > $1::text) ORDER BY id LIMIT $2",
            USER_COLUMNS
        );
        let after = after.map(UserId::as_str);
        let rows = conn
            .query(sql.as_str(), &[&after, &to_limit(limit)])
            .await
            .map_err(backend_error)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn user_search(&self, prefix: &str, limit: usize) -> IamResult<Vec<User>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM users \
             WHERE id LIKE $1 ESCAPE '\\' OR display_name LIKE $1 ESCAPE '\\' \
             ORDER BY id LIMIT $2",
            USER_COLUMNS
        );
        let pattern = like_prefix(prefix);
        let rows = conn
            .query(sql.as_str(), &[&pattern, &to_limit(limit)])
            .await
            .map_err(backend_error)?;
        rows.iter().map(user_from_row).collect()
    }

    async fn user_apply_roles(
        &self,
        edit: &EditUser,
        admin: &UserId,
        at: Timestamp,
    ) -> IamResult<AdminEvent> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(backend_error)?;

        tx.execute(
            "INSERT INTO users (id, active, roles) VALUES ($1, FALSE, $2) \
             ON CONFLICT (id) DO UPDATE SET roles = EXCLUDED.roles",
            &[&edit.id.as_str(), &Json(&edit.roles)],
        )
        .await
        .map_err(backend_error)?;

        let row = tx
            .query_one(
                "INSERT INTO admin_events (ts, admin_id, user_id, roles) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[&at, &admin.as_str(), &edit.id.as_str(), &Json(&edit.roles)],
            )
            .await
            .map_err(backend_error)?;
        let id: i64 = row.try_get(0).map_err(backend_error)?;

        // Dropping the transaction before this point rolls both writes back.
        tx.commit().await.map_err(backend_error)?;

        Ok(AdminEvent {
            id,
            ts: at,
            admin: admin.clone(),
            user: edit.id.clone(),
            roles: edit.roles.clone(),
        })
    }

    async fn user_enrich(&self, id: &UserId, display_name: &str, profile: &str) -> IamResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE users SET display_name = $2, profile = $3, active = TRUE WHERE id = $1",
            &[&id.as_str(), &display_name, &profile],
        )
        .await
        .map_err(backend_error)
    }

    async fn user_record_access(
        &self,
        id: &UserId,
        first_access: Option<Timestamp>,
        last_access: Timestamp,
    ) -> IamResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE users \
             SET first_access = COALESCE($2::timestamptz, first_access), last_access = $3 \
             WHERE id = $1",
            &[&id.as_str(), &first_access, &last_access],
        )
        .await
        .map_err(backend_error)
    }

    // ========================================================================
    // EVENT OPERATIONS
    // ========================================================================

    async fn event_list_after(&self, after: EventCursor, limit: usize) -> IamResult<Vec<AdminEvent>> {
        let conn = self.get_conn().await?;
        // A NULL id makes the tie-break false, leaving a plain `ts > $1`.
        let sql = format!(
            "SELECT {} FROM admin_events \
             WHERE ts > $1 OR (ts = $1 AND id > $2::bigint) \
             ORDER BY ts, id LIMIT $3",
            EVENT_COLUMNS
        );
        let rows = conn
            .query(sql.as_str(), &[&after.ts, &after.id, &to_limit(limit)])
            .await
            .map_err(backend_error)?;
        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("ali"), "ali%");
        assert_eq!(like_prefix(""), "%");
        assert_eq!(like_prefix("50%_off"), "50\\%\\_off%");
        assert_eq!(like_prefix("a\\b"), "a\\\\b%");
    }

    #[test]
    fn test_to_limit_saturates() {
        assert_eq!(to_limit(100), 100);
        assert_eq!(to_limit(usize::MAX), i64::MAX);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let creates = SCHEMA.matches("CREATE").count();
        let guarded = SCHEMA.matches("IF NOT EXISTS").count();
        assert_eq!(creates, 3);
        assert_eq!(guarded, creates);
    }
}
