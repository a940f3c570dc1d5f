//! Store facade tests against the in-memory backend.

use chrono::TimeZone;
use iam_core::{
    AdminEvent, EditUser, IamError, Role, SteppingClock, Timestamp, User, UserId,
};
use iam_storage::{EventTailConfig, IamStorage, IamStore, MockOp, MockStorage, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

fn start() -> Timestamp {
    chrono::Utc
        .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

struct Harness {
    storage: MockStorage,
    clock: Arc<SteppingClock>,
    store: IamStore,
}

fn harness() -> Harness {
    harness_with(StoreConfig::default())
}

fn harness_with(config: StoreConfig) -> Harness {
    let storage = MockStorage::new();
    let clock = Arc::new(SteppingClock::new(start(), chrono::Duration::seconds(1)));
    let store = IamStore::with_clock(Arc::new(storage.clone()), clock.clone(), config);
    Harness {
        storage,
        clock,
        store,
    }
}

fn admin() -> User {
    User::new("root@example.com", vec![Role::new("admin", "/")])
}

fn reader() -> User {
    User::new("reader@example.com", vec![Role::new("reader", "/")])
}

async fn wait_for_window(store: &IamStore, len: usize) -> Vec<AdminEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let window = store.event_tail().snapshot().await;
        if window.len() >= len {
            return window;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "event tail never caught up: {} of {} events",
            window.len(),
            len
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// ROLE EDITS
// ============================================================================

#[tokio::test]
async fn non_admin_update_changes_nothing() {
    let h = harness();
    let target = User::new("t@example.com", vec![Role::new("reader", "/docs")]);
    h.storage.insert_user(target.clone()).expect("seed");
    let edit = EditUser::new(target.id.clone(), vec![Role::new("admin", "/")]);

    // A grant on a sub-path is not enough.
    let scoped_admin = User::new("scoped@example.com", vec![Role::new("admin", "/team")]);
    for caller in [None, Some(&reader()), Some(&scoped_admin)] {
        let err = h
            .store
            .update_user(caller, edit.clone())
            .await
            .expect_err("must be rejected");
        assert!(matches!(err, IamError::Unauthorized { .. }));
    }

    assert_eq!(h.storage.event_count(), 0);
    assert_eq!(h.storage.peek_user(&target.id), Some(target));
}

#[tokio::test]
async fn update_writes_one_event_with_role_snapshot() {
    let h = harness();
    let admin = admin();
    let roles = vec![Role::new("reader", "/docs"), Role::new("writer", "/docs/drafts")];
    let edit = EditUser::new("new@example.com", roles.clone());
    let expected_ts = h.clock.peek();

    let user = h
        .store
        .update_user(Some(&admin), edit.clone())
        .await
        .expect("update");

    assert_eq!(user.roles, roles);
    assert!(!user.active);

    let events = h.storage.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].roles, roles);
    assert_eq!(events[0].admin, admin.id);
    assert_eq!(events[0].user, edit.id);
    assert_eq!(events[0].ts, expected_ts);

    // Cache and backend agree.
    let cached = h.store.get_user(&edit.id).await.expect("read");
    assert_eq!(Some(cached), h.storage.peek_user(&edit.id));
}

#[tokio::test]
async fn failed_audit_insert_rolls_back_roles() {
    let h = harness();
    let admin = admin();
    let target = UserId::from("t@example.com");
    let original = vec![Role::new("reader", "/")];
    h.store
        .update_user(Some(&admin), EditUser::new(target.clone(), original.clone()))
        .await
        .expect("initial edit");

    h.storage.fail_next_event_insert();
    let err = h
        .store
        .update_user(Some(&admin), EditUser::new(target.clone(), vec![Role::new("admin", "/")]))
        .await
        .expect_err("audit insert fails");
    assert!(matches!(err, IamError::BackendUnavailable { .. }));

    let after = h.store.get_user(&target).await.expect("read");
    assert_eq!(after.roles, original);
    assert_eq!(h.storage.event_count(), 1);
}

#[tokio::test]
async fn first_read_misses_second_read_hits() {
    let h = harness();
    // Written straight to the backend so the cache has never seen it.
    let edit = EditUser::new("fresh@example.com", vec![Role::new("reader", "/")]);
    h.storage
        .user_apply_roles(&edit, &admin().id, start())
        .await
        .expect("backend write");

    let first = h.store.get_user(&edit.id).await.expect("miss");
    let second = h.store.get_user(&edit.id).await.expect("hit");
    assert_eq!(first, second);
    assert_eq!(first.roles, edit.roles);
    assert_eq!(h.storage.calls(MockOp::UserGet), 1);

    let stats = h.store.cache_stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_for_distinct_targets() {
    let h = harness();
    h.store.start();
    let admin = admin();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = h.store.clone();
        let admin = admin.clone();
        handles.push(tokio::spawn(async move {
            let edit = EditUser::new(
                format!("user{:02}@example.com", i),
                vec![Role::new("reader", format!("/team{}", i))],
            );
            store.update_user(Some(&admin), edit).await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("update");
    }

    let events = h.storage.events();
    assert_eq!(events.len(), 16);
    let mut targets: Vec<String> = events.iter().map(|e| e.user.to_string()).collect();
    targets.sort();
    targets.dedup();
    assert_eq!(targets.len(), 16);
    let mut ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);

    let window = wait_for_window(&h.store, 16).await;
    assert_eq!(window.len(), 16);
    h.store.shutdown().await;
}

#[tokio::test]
async fn back_to_back_notifications_are_both_observed() {
    let config = StoreConfig::new().with_event_tail(
        EventTailConfig::new()
            .with_refresh_interval(Duration::from_secs(3600))
            .with_horizon(chrono::Duration::hours(1)),
    );
    let h = harness_with(config);
    h.store.start();
    let admin = admin();

    h.store
        .update_user(Some(&admin), EditUser::new("a@example.com", vec![]))
        .await
        .expect("first");
    h.store
        .update_user(Some(&admin), EditUser::new("b@example.com", vec![]))
        .await
        .expect("second");

    let window = wait_for_window(&h.store, 2).await;
    let users: Vec<&str> = window.iter().map(|e| e.user.as_str()).collect();
    assert_eq!(users, vec!["a@example.com", "b@example.com"]);
    h.store.shutdown().await;
}

// ============================================================================
// EVENT HISTORY
// ============================================================================

#[tokio::test]
async fn events_fast_path_and_fallback() {
    let config = StoreConfig::new().with_event_tail(
        EventTailConfig::new()
            .with_capacity(3)
            .with_horizon(chrono::Duration::hours(1)),
    );
    let h = harness_with(config);
    let admin = admin();
    for i in 0..5 {
        h.store
            .update_user(Some(&admin), EditUser::new(format!("u{}@example.com", i), vec![]))
            .await
            .expect("update");
    }
    h.store.event_tail().refresh().await.expect("refresh");
    let all = h.storage.events();
    let window = h.store.event_tail().snapshot().await;
    assert_eq!(window, all[2..].to_vec());

    // Inside the window: answered from memory.
    let reads = h.storage.calls(MockOp::EventListAfter);
    let recent = h.store.events(Some(all[2].ts)).await.expect("fast path");
    assert_eq!(recent, all[3..].to_vec());
    assert_eq!(h.storage.calls(MockOp::EventListAfter), reads);

    // Older than the window: read from the backend, capped at capacity.
    let older = h.store.events(Some(all[0].ts)).await.expect("fallback");
    let direct = h
        .storage
        .event_list_after(all[0].ts.into(), 3)
        .await
        .expect("direct read");
    assert_eq!(older, direct);
    assert_eq!(older, all[1..4].to_vec());
}

#[tokio::test]
async fn events_default_horizon_uses_clock() {
    let h = harness();
    let admin = admin();
    h.storage
        .insert_event(&admin.id, &UserId::from("old@example.com"), vec![], start() - chrono::Duration::days(2))
        .expect("old event");
    h.store
        .update_user(Some(&admin), EditUser::new("new@example.com", vec![]))
        .await
        .expect("update");

    let events = h.store.events(None).await.expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user.as_str(), "new@example.com");
}

// ============================================================================
// PROFILE AND ACCESS
// ============================================================================

#[tokio::test]
async fn non_admin_cannot_enrich_someone_else() {
    let h = harness();
    let mut victim = User::new("victim@example.com", vec![]);
    victim.display_name = Some("Victim".to_string());
    victim.profile = Some("{}".to_string());
    h.storage.insert_user(victim.clone()).expect("seed");
    let reader = reader();
    h.storage.insert_user(reader.clone()).expect("seed");

    let err = h
        .store
        .enrich_profile(Some(&reader), &victim.id, "Pwned", "{\"evil\":true}")
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, IamError::Unauthorized { .. }));
    assert_eq!(h.storage.peek_user(&victim.id), Some(victim));
}

#[tokio::test]
async fn enrich_updates_cached_copy() {
    let h = harness();
    let carol = User::new("carol@example.com", vec![]);
    h.storage.insert_user(carol.clone()).expect("seed");
    // Warm the cache with the inactive copy.
    assert!(!h.store.get_user(&carol.id).await.expect("read").active);

    h.store
        .enrich_profile(Some(&carol), &carol.id, "Carol", "{}")
        .await
        .expect("enrich");
    let read = h.store.get_user(&carol.id).await.expect("read");
    assert!(read.active);
    assert_eq!(read.display_name.as_deref(), Some("Carol"));
    assert_eq!(Some(read), h.storage.peek_user(&carol.id));
}

#[tokio::test]
async fn record_access_sets_first_access_once() {
    let h = harness();
    h.storage
        .insert_user(User::new("dave@example.com", vec![]))
        .expect("seed");
    let id = UserId::from("dave@example.com");

    let caller = h.store.get_user(&id).await.expect("read");
    let first_at = h.clock.peek();
    let first = h.store.record_access(Some(&caller)).await.expect("first login");
    assert_eq!(first.first_access, Some(first_at));
    assert_eq!(first.last_access, Some(first_at));

    h.clock.advance(chrono::Duration::minutes(5));
    let second_at = h.clock.peek();
    let second = h.store.record_access(Some(&first)).await.expect("second login");
    assert_eq!(second.first_access, Some(first_at));
    assert_eq!(second.last_access, Some(second_at));
    assert_eq!(h.store.get_user(&id).await.expect("read"), second);
}

#[tokio::test]
async fn record_access_failures() {
    let h = harness();
    assert_eq!(
        h.store.record_access(None).await.expect_err("no caller"),
        IamError::Unauthenticated
    );

    let ghost = User::new("ghost@example.com", vec![]);
    let err = h
        .store
        .record_access(Some(&ghost))
        .await
        .expect_err("no row");
    assert!(matches!(err, IamError::UpdateFailed { .. }));
}

#[tokio::test]
async fn backend_outage_surfaces_as_unavailable() {
    let h = harness();
    h.storage.set_unavailable(true);
    let err = h
        .store
        .get_user(&UserId::from("x@example.com"))
        .await
        .expect_err("outage");
    assert!(matches!(err, IamError::BackendUnavailable { .. }));
    assert!(h.store.list_users(None).await.is_err());
}
