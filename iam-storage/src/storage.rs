//! Async storage trait for the user and audit-event tables.
//!
//! The store facade only ever talks to the backend through [`IamStorage`].
//! The PostgreSQL implementation lives in `iam-api`; [`crate::MockStorage`]
//! is the in-memory implementation used by tests.

use ::async_trait::async_trait;
use iam_core::{AdminEvent, EditUser, IamResult, Timestamp, User, UserId};

/// Async storage trait for user rows and admin events.
///
/// Implementations must be safe to share across tasks. Every method maps
/// backend failures to [`iam_core::IamError::BackendUnavailable`].
#[async_trait]
pub trait IamStorage: Send + Sync {
    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Get a user by id.
    async fn user_get(&self, id: &UserId) -> IamResult<Option<User>>;

    /// Page through users ordered by id, starting strictly after `after`.
    async fn user_list(&self, after: Option<&UserId>, limit: usize) -> IamResult<Vec<User>>;

    /// Users whose id or display name starts with `prefix`, ordered by id.
    async fn user_search(&self, prefix: &str, limit: usize) -> IamResult<Vec<User>>;

    /// Replace a user's role set and append the matching audit event.
    ///
    /// Creates the row (inactive) when it does not exist. The upsert and the
    /// event insert commit together or not at all.
    async fn user_apply_roles(
        &self,
        edit: &EditUser,
        admin: &UserId,
        at: Timestamp,
    ) -> IamResult<AdminEvent>;

    /// Set display name and profile, marking the user active.
    ///
    /// Returns the number of rows affected.
    async fn user_enrich(&self, id: &UserId, display_name: &str, profile: &str) -> IamResult<u64>;

    /// Stamp access times. `first_access` is only written when `Some`.
    ///
    /// Returns the number of rows affected.
    async fn user_record_access(
        &self,
        id: &UserId,
        first_access: Option<Timestamp>,
        last_access: Timestamp,
    ) -> IamResult<u64>;

    // ========================================================================
    // EVENT OPERATIONS
    // ========================================================================

    /// Events strictly after `after` in `(ts, id)` order, ascending.
    async fn event_list_after(&self, after: EventCursor, limit: usize) -> IamResult<Vec<AdminEvent>>;
}

/// Exclusive lower bound on the `(ts, id)` order of admin events.
///
/// Without an id the bound excludes every event at `ts`; with one it only
/// excludes events at `ts` whose id is not greater, so events sharing a
/// timestamp can be paged through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCursor {
    pub ts: Timestamp,
    pub id: Option<i64>,
}

impl EventCursor {
    /// Position just past `event`.
    pub fn after_event(event: &AdminEvent) -> Self {
        Self {
            ts: event.ts,
            id: Some(event.id),
        }
    }

    /// Whether `event` lies strictly after this cursor.
    pub fn admits(&self, event: &AdminEvent) -> bool {
        match self.id {
            None => event.ts > self.ts,
            Some(id) => (event.ts, event.id) > (self.ts, id),
        }
    }
}

impl From<Timestamp> for EventCursor {
    fn from(ts: Timestamp) -> Self {
        Self { ts, id: None }
    }
}
