//! iam4apis Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for users, roles and paths
//! - Test fixtures for common callers and stores
//! - Custom assertions for store errors

// Re-export mock storage from its source crate
pub use iam_storage::{MockOp, MockStorage};

// Re-export core types for convenience
pub use iam_core::{
    is_admin, is_in_role, AdminEvent, Clock, EditUser, FixedClock, IamError, IamResult, Role,
    SteppingClock, Timestamp, User, UserId, ADMIN_ROLE, ROOT_PATH,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating iam4apis entity types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a path segment (no slashes).
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,8}"
    }

    /// Generate an absolute path, `/` included.
    pub fn arb_path() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 0..4)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }

    /// Generate a path that extends `base` (possibly `base` itself).
    pub fn arb_path_extension(base: String) -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 0..3).prop_map(move |segments| {
            if segments.is_empty() {
                base.clone()
            } else {
                format!("{}/{}", base.trim_end_matches('/'), segments.join("/"))
            }
        })
    }

    /// Generate a role name.
    pub fn arb_role_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(ADMIN_ROLE.to_string()),
            Just("reader".to_string()),
            Just("writer".to_string()),
            "[a-z]{3,10}",
        ]
    }

    /// Generate a role grant.
    pub fn arb_role() -> impl Strategy<Value = Role> {
        (arb_role_name(), arb_path()).prop_map(|(name, path)| Role::new(name, path))
    }

    /// Generate a user id shaped like an e-mail address.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        ("[a-z][a-z0-9.]{0,10}", "[a-z]{2,8}")
            .prop_map(|(local, domain)| UserId::new(format!("{}@{}.example", local, domain)))
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a user with up to four grants.
    pub fn arb_user() -> impl Strategy<Value = User> {
        (
            arb_user_id(),
            any::<bool>(),
            prop::collection::vec(arb_role(), 0..4),
            prop::option::of("[A-Z][a-z]{2,10}"),
            prop::option::of(arb_timestamp()),
        )
            .prop_map(|(id, active, roles, display_name, first_access)| User {
                id,
                active,
                roles,
                display_name,
                profile: None,
                first_access,
                last_access: first_access,
            })
    }

    /// Generate a role edit for an arbitrary user.
    pub fn arb_edit() -> impl Strategy<Value = EditUser> {
        (arb_user_id(), prop::collection::vec(arb_role(), 0..4))
            .prop_map(|(id, roles)| EditUser::new(id, roles))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;
    use iam_storage::{IamStore, StoreConfig};
    use std::sync::Arc;

    /// Id of the admin returned by [`admin_user`].
    pub const ADMIN_ID: &str = "root@example.com";

    /// An active user holding `admin` on `/`.
    pub fn admin_user() -> User {
        let mut user = User::new(ADMIN_ID, vec![Role::new(ADMIN_ROLE, ROOT_PATH)]);
        user.active = true;
        user
    }

    /// An active user with a single `reader` grant on `/docs`.
    pub fn plain_user(id: &str) -> User {
        let mut user = User::new(id, vec![Role::new("reader", "/docs")]);
        user.active = true;
        user
    }

    /// Role edit for `id` with the given `(name, path)` grants.
    pub fn edit(id: &str, grants: &[(&str, &str)]) -> EditUser {
        EditUser::new(
            id,
            grants
                .iter()
                .map(|(name, path)| Role::new(*name, *path))
                .collect(),
        )
    }

    /// Fixed starting instant used by the clocks below.
    pub fn epoch() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// Clock starting at [`epoch`] that advances one second per read.
    pub fn stepping_clock() -> Arc<SteppingClock> {
        Arc::new(SteppingClock::new(epoch(), chrono::Duration::seconds(1)))
    }

    /// Mock backend holding only [`admin_user`], plus a store over it.
    pub fn seeded_store(config: StoreConfig) -> (MockStorage, IamStore) {
        let storage = MockStorage::new();
        // A fresh mock never fails an insert.
        let _ = storage.insert_user(admin_user());
        let store = IamStore::with_clock(Arc::new(storage.clone()), stepping_clock(), config);
        (storage, store)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for store results.

    use super::*;

    /// Assert that an IamResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &IamResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that an IamResult is an Unauthorized error.
    #[track_caller]
    pub fn assert_unauthorized<T: std::fmt::Debug>(result: &IamResult<T>) {
        match result {
            Err(IamError::Unauthorized { .. }) => {}
            other => panic!("Expected Unauthorized error, got: {:?}", other),
        }
    }

    /// Assert that an IamResult is a NotFound error for `id`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &IamResult<T>, id: &str) {
        match result {
            Err(IamError::NotFound { id: missing }) => {
                assert_eq!(missing.as_str(), id, "Wrong id in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", id, other),
        }
    }

    /// Assert that events are strictly ascending by `(ts, id)`.
    #[track_caller]
    pub fn assert_ascending(events: &[AdminEvent]) {
        for pair in events.windows(2) {
            assert!(
                (pair[0].ts, pair[0].id) < (pair[1].ts, pair[1].id),
                "Events out of order: {}#{} then {}#{}",
                pair[0].ts,
                pair[0].id,
                pair[1].ts,
                pair[1].id
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use iam_storage::StoreConfig;
    use proptest::prelude::*;

    #[test]
    fn test_fixtures_roles() {
        assert!(is_admin(Some(&admin_user())));
        assert!(!is_admin(Some(&plain_user("p@example.com"))));
        assert_eq!(edit("x@example.com", &[("reader", "/a")]).roles.len(), 1);
    }

    #[tokio::test]
    async fn test_seeded_store_knows_admin() {
        let (storage, store) = seeded_store(StoreConfig::default());
        assert_eq!(storage.user_count(), 1);
        let admin = store.get_user(&UserId::from(ADMIN_ID)).await;
        assert_ok(&admin);

        let missing = store.get_user(&UserId::from("nobody@example.com")).await;
        assert_not_found(&missing, "nobody@example.com");
    }

    proptest! {
        #[test]
        fn prop_generated_grants_cover_extensions(
            (role, requested) in arb_role().prop_flat_map(|role| {
                let path = role.path.clone();
                (Just(role), arb_path_extension(path))
            }),
            others in prop::collection::vec(arb_role(), 0..3),
        ) {
            let mut roles = others;
            roles.push(role.clone());
            let user = User::new("p@example.com", roles);
            prop_assert!(user.is_in_role(&role.name, &role.path));
            prop_assert!(user.is_in_role(&role.name, &requested));
        }

        #[test]
        fn prop_user_without_grants_holds_nothing(
            user in arb_user(),
            role in arb_role_name(),
            path in arb_path(),
        ) {
            let stripped = User { roles: Vec::new(), ..user };
            prop_assert!(!is_in_role(Some(&stripped), &role, &path));
        }

        #[test]
        fn prop_generated_edits_are_well_formed(edit in arb_edit()) {
            prop_assert!(!edit.id.is_empty());
            prop_assert!(edit.roles.iter().all(|r| r.path.starts_with('/')));
        }
    }
}
