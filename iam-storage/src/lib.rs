//! iam4apis Storage - Storage Trait, Caches and Store Facade
//!
//! Defines the storage abstraction for users and audit events, the
//! cache-aside user cache, the event tail, and the [`IamStore`] facade that
//! ties them together. The PostgreSQL implementation lives in iam-api.

pub mod cache;
pub mod event_tail;
pub mod storage;
pub mod store;

pub use cache::{CacheStats, UserCache, UserCacheConfig};
pub use event_tail::{EventTail, EventTailConfig, EventTailMetrics, EventTailSnapshot};
pub use storage::{EventCursor, IamStorage};
pub use store::{IamStore, StoreConfig};

use ::async_trait::async_trait;
use iam_core::{AdminEvent, EditUser, IamError, IamResult, Timestamp, User, UserId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

// ============================================================================
// MOCK STORAGE (for testing)
// ============================================================================

/// Backend operations counted by [`MockStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    UserGet,
    UserList,
    UserSearch,
    UserApplyRoles,
    UserEnrich,
    UserRecordAccess,
    EventListAfter,
}

#[derive(Debug, Default)]
struct CallCounts {
    user_get: AtomicU64,
    user_list: AtomicU64,
    user_search: AtomicU64,
    user_apply_roles: AtomicU64,
    user_enrich: AtomicU64,
    user_record_access: AtomicU64,
    event_list_after: AtomicU64,
}

impl CallCounts {
    fn counter(&self, op: MockOp) -> &AtomicU64 {
        match op {
            MockOp::UserGet => &self.user_get,
            MockOp::UserList => &self.user_list,
            MockOp::UserSearch => &self.user_search,
            MockOp::UserApplyRoles => &self.user_apply_roles,
            MockOp::UserEnrich => &self.user_enrich,
            MockOp::UserRecordAccess => &self.user_record_access,
            MockOp::EventListAfter => &self.event_list_after,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_event_insert: AtomicBool,
    fail_event_reads: AtomicBool,
    unavailable: AtomicBool,
}

/// In-memory storage for unit and integration tests.
///
/// Users live in an id-ordered map so range scans behave like the SQL
/// backend. Event ids are handed out from a counter and only consumed by
/// committed edits.
#[derive(Debug, Default, Clone)]
pub struct MockStorage {
    users: Arc<RwLock<BTreeMap<UserId, User>>>,
    events: Arc<RwLock<Vec<AdminEvent>>>,
    last_event_id: Arc<AtomicI64>,
    calls: Arc<CallCounts>,
    faults: Arc<Faults>,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user row directly, bypassing the audit trail.
    pub fn insert_user(&self, user: User) -> IamResult<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        users.insert(user.id.clone(), user);
        Ok(())
    }

    /// Append a historical event directly, as if written by another process.
    pub fn insert_event(
        &self,
        admin: &UserId,
        user: &UserId,
        roles: Vec<iam_core::Role>,
        ts: Timestamp,
    ) -> IamResult<AdminEvent> {
        let mut events = self.events.write().map_err(poisoned)?;
        let event = AdminEvent {
            id: self.last_event_id.fetch_add(1, Ordering::SeqCst) + 1,
            ts,
            admin: admin.clone(),
            user: user.clone(),
            roles,
        };
        events.push(event.clone());
        Ok(event)
    }

    /// Get count of stored users.
    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or_default()
    }

    /// Get count of stored events.
    pub fn event_count(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or_default()
    }

    /// All stored events in `(ts, id)` order.
    pub fn events(&self) -> Vec<AdminEvent> {
        let mut events = self
            .events
            .read()
            .map(|e| e.clone())
            .unwrap_or_default();
        events.sort_by(|a, b| (a.ts, a.id).cmp(&(b.ts, b.id)));
        events
    }

    /// Stored row for `id`, without touching call counters.
    pub fn peek_user(&self, id: &UserId) -> Option<User> {
        self.users.read().ok().and_then(|u| u.get(id).cloned())
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: MockOp) -> u64 {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    /// Make the next audit insert fail after the role upsert has been applied.
    pub fn fail_next_event_insert(&self) {
        self.faults.fail_next_event_insert.store(true, Ordering::SeqCst);
    }

    /// Make event range reads fail until switched off.
    pub fn set_event_reads_failing(&self, failing: bool) {
        self.faults.fail_event_reads.store(failing, Ordering::SeqCst);
    }

    /// Make every operation fail until switched off.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn enter(&self, op: MockOp) -> IamResult<()> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(IamError::backend("mock storage unavailable"));
        }
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> IamError {
    IamError::backend("mock storage lock poisoned")
}

#[async_trait]
impl IamStorage for MockStorage {
    // === User Operations ===

    async fn user_get(&self, id: &UserId) -> IamResult<Option<User>> {
        self.enter(MockOp::UserGet)?;
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(id).cloned())
    }

    async fn user_list(&self, after: Option<&UserId>, limit: usize) -> IamResult<Vec<User>> {
        self.enter(MockOp::UserList)?;
        let users = self.users.read().map_err(poisoned)?;
        Ok(users
            .iter()
            .filter(|(id, _)| after.map_or(true, |after| *id > after))
            .take(limit)
            .map(|(_, user)| user.clone())
            .collect())
    }

    async fn user_search(&self, prefix: &str, limit: usize) -> IamResult<Vec<User>> {
        self.enter(MockOp::UserSearch)?;
        let users = self.users.read().map_err(poisoned)?;
        Ok(users
            .values()
            .filter(|user| {
                user.id.as_str().starts_with(prefix)
                    || user
                        .display_name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(prefix))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn user_apply_roles(
        &self,
        edit: &EditUser,
        admin: &UserId,
        at: Timestamp,
    ) -> IamResult<AdminEvent> {
        self.enter(MockOp::UserApplyRoles)?;
        // Both locks for the whole unit, users first, so readers never see
        // the upsert without its event.
        let mut users = self.users.write().map_err(poisoned)?;
        let mut events = self.events.write().map_err(poisoned)?;

        let previous = users.get(&edit.id).cloned();
        let mut row = previous
            .clone()
            .unwrap_or_else(|| User::new(edit.id.clone(), Vec::new()));
        row.roles = edit.roles.clone();
        users.insert(edit.id.clone(), row);

        if self.faults.fail_next_event_insert.swap(false, Ordering::SeqCst) {
            match previous {
                Some(previous) => users.insert(edit.id.clone(), previous),
                None => users.remove(&edit.id),
            };
            return Err(IamError::backend("audit event insert failed"));
        }

        let event = AdminEvent {
            id: self.last_event_id.fetch_add(1, Ordering::SeqCst) + 1,
            ts: at,
            admin: admin.clone(),
            user: edit.id.clone(),
            roles: edit.roles.clone(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn user_enrich(&self, id: &UserId, display_name: &str, profile: &str) -> IamResult<u64> {
        self.enter(MockOp::UserEnrich)?;
        let mut users = self.users.write().map_err(poisoned)?;
        let Some(user) = users.get_mut(id) else {
            return Ok(0);
        };
        user.active = true;
        user.display_name = Some(display_name.to_string());
        user.profile = Some(profile.to_string());
        Ok(1)
    }

    async fn user_record_access(
        &self,
        id: &UserId,
        first_access: Option<Timestamp>,
        last_access: Timestamp,
    ) -> IamResult<u64> {
        self.enter(MockOp::UserRecordAccess)?;
        let mut users = self.users.write().map_err(poisoned)?;
        let Some(user) = users.get_mut(id) else {
            return Ok(0);
        };
        if let Some(first) = first_access {
            user.first_access = Some(first);
        }
        user.last_access = Some(last_access);
        Ok(1)
    }

    // === Event Operations ===

    async fn event_list_after(&self, after: EventCursor, limit: usize) -> IamResult<Vec<AdminEvent>> {
        self.enter(MockOp::EventListAfter)?;
        if self.faults.fail_event_reads.load(Ordering::SeqCst) {
            return Err(IamError::backend("event read failed"));
        }
        let events = self.events.read().map_err(poisoned)?;
        let mut newer: Vec<AdminEvent> = events.iter().filter(|e| after.admits(e)).cloned().collect();
        newer.sort_by(|a, b| (a.ts, a.id).cmp(&(b.ts, b.id)));
        newer.truncate(limit);
        Ok(newer)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use iam_core::Role;

    fn at(secs: i64) -> Timestamp {
        chrono::Utc
            .timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn admin() -> UserId {
        UserId::from("root@example.com")
    }

    #[tokio::test]
    async fn test_apply_roles_creates_inactive_user_and_event() {
        let storage = MockStorage::new();
        let edit = EditUser::new("alice@example.com", vec![Role::new("reader", "/docs")]);

        let event = storage
            .user_apply_roles(&edit, &admin(), at(1))
            .await
            .expect("apply should succeed");

        assert_eq!(event.id, 1);
        assert_eq!(event.roles, edit.roles);
        let stored = storage.peek_user(&edit.id).expect("row exists");
        assert!(!stored.active);
        assert_eq!(stored.roles, edit.roles);
        assert_eq!(storage.event_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_roles_keeps_profile_fields() {
        let storage = MockStorage::new();
        let mut existing = User::new("bob@example.com", vec![Role::new("reader", "/")]);
        existing.active = true;
        existing.display_name = Some("Bob".to_string());
        storage.insert_user(existing.clone()).expect("insert");

        let edit = EditUser::new("bob@example.com", vec![Role::new("writer", "/a")]);
        storage
            .user_apply_roles(&edit, &admin(), at(1))
            .await
            .expect("apply should succeed");

        let stored = storage.peek_user(&existing.id).expect("row exists");
        assert!(stored.active);
        assert_eq!(stored.display_name.as_deref(), Some("Bob"));
        assert_eq!(stored.roles, edit.roles);
    }

    #[tokio::test]
    async fn test_failed_event_insert_rolls_back_upsert() {
        let storage = MockStorage::new();
        let before = User::new("carol@example.com", vec![Role::new("reader", "/")]);
        storage.insert_user(before.clone()).expect("insert");
        storage.fail_next_event_insert();

        let edit = EditUser::new("carol@example.com", vec![Role::new("admin", "/")]);
        let err = storage
            .user_apply_roles(&edit, &admin(), at(1))
            .await
            .expect_err("insert should fail");
        assert!(matches!(err, IamError::BackendUnavailable { .. }));
        assert_eq!(storage.peek_user(&before.id), Some(before));
        assert_eq!(storage.event_count(), 0);

        // Fault is one-shot.
        storage
            .user_apply_roles(&edit, &admin(), at(2))
            .await
            .expect("second apply should succeed");
        assert_eq!(storage.event_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_insert_removes_new_row() {
        let storage = MockStorage::new();
        storage.fail_next_event_insert();
        let edit = EditUser::new("dave@example.com", vec![]);
        assert!(storage.user_apply_roles(&edit, &admin(), at(1)).await.is_err());
        assert_eq!(storage.user_count(), 0);
    }

    #[tokio::test]
    async fn test_user_list_is_exclusive_and_bounded() {
        let storage = MockStorage::new();
        for name in ["a", "b", "c", "d"] {
            storage
                .insert_user(User::new(format!("{}@example.com", name), vec![]))
                .expect("insert");
        }

        let first = storage.user_list(None, 2).await.expect("list");
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id.as_str(), "a@example.com");

        let after = first[1].id.clone();
        let next = storage.user_list(Some(&after), 10).await.expect("list");
        let ids: Vec<&str> = next.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["c@example.com", "d@example.com"]);
    }

    #[tokio::test]
    async fn test_user_search_matches_id_or_name_prefix() {
        let storage = MockStorage::new();
        let mut named = User::new("x1@example.com", vec![]);
        named.display_name = Some("Margaret".to_string());
        storage.insert_user(named).expect("insert");
        storage
            .insert_user(User::new("mark@example.com", vec![]))
            .expect("insert");
        storage
            .insert_user(User::new("zed@example.com", vec![]))
            .expect("insert");

        let found = storage.user_search("Mar", 100).await.expect("search");
        assert_eq!(found.len(), 1);
        let found = storage.user_search("mar", 100).await.expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "mark@example.com");
    }

    #[tokio::test]
    async fn test_enrich_and_access_report_rows() {
        let storage = MockStorage::new();
        let id = UserId::from("erin@example.com");
        assert_eq!(storage.user_enrich(&id, "Erin", "{}").await.expect("enrich"), 0);
        assert_eq!(
            storage.user_record_access(&id, None, at(1)).await.expect("access"),
            0
        );

        storage.insert_user(User::new(id.clone(), vec![])).expect("insert");
        assert_eq!(storage.user_enrich(&id, "Erin", "{}").await.expect("enrich"), 1);
        assert_eq!(
            storage
                .user_record_access(&id, Some(at(1)), at(1))
                .await
                .expect("access"),
            1
        );
        storage
            .user_record_access(&id, None, at(5))
            .await
            .expect("access");

        let stored = storage.peek_user(&id).expect("row exists");
        assert!(stored.active);
        assert_eq!(stored.first_access, Some(at(1)));
        assert_eq!(stored.last_access, Some(at(5)));
    }

    #[tokio::test]
    async fn test_event_list_after_is_strict_and_ordered() {
        let storage = MockStorage::new();
        let target = UserId::from("t@example.com");
        storage.insert_event(&admin(), &target, vec![], at(30)).expect("event");
        storage.insert_event(&admin(), &target, vec![], at(10)).expect("event");
        storage.insert_event(&admin(), &target, vec![], at(20)).expect("event");

        let events = storage.event_list_after(at(10).into(), 10).await.expect("events");
        let times: Vec<Timestamp> = events.iter().map(|e| e.ts).collect();
        assert_eq!(times, vec![at(20), at(30)]);

        let limited = storage.event_list_after(at(0).into(), 1).await.expect("events");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].ts, at(10));
        assert_eq!(storage.calls(MockOp::EventListAfter), 2);
    }

    #[tokio::test]
    async fn test_event_list_after_pages_within_a_timestamp() {
        let storage = MockStorage::new();
        let target = UserId::from("t@example.com");
        for _ in 0..3 {
            storage.insert_event(&admin(), &target, vec![], at(10)).expect("event");
        }

        let first = storage.event_list_after(at(0).into(), 2).await.expect("events");
        let ids: Vec<i64> = first.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let cursor = EventCursor::after_event(&first[1]);
        let rest = storage.event_list_after(cursor, 2).await.expect("events");
        let ids: Vec<i64> = rest.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn test_fault_switches() {
        let storage = MockStorage::new();
        storage.set_event_reads_failing(true);
        assert!(storage.event_list_after(at(0).into(), 10).await.is_err());
        storage.set_event_reads_failing(false);
        assert!(storage.event_list_after(at(0).into(), 10).await.is_ok());

        storage.set_unavailable(true);
        let err = storage
            .user_get(&admin())
            .await
            .expect_err("unavailable");
        assert!(matches!(err, IamError::BackendUnavailable { .. }));
        assert_eq!(storage.calls(MockOp::UserGet), 1);
    }
}
