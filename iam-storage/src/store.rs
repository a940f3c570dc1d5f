//! Store Facade
//!
//! [`IamStore`] is the single entry point request handlers use. It combines
//! the backend, the user cache and the event tail:
//!
//! - point reads go through the cache (cache-aside)
//! - list and search bypass the cache
//! - every mutation is authorized against the resolved caller, written to
//!   the backend, and then reflected in the cache
//! - committed role edits wake the event tail
//!
//! ```ignore
//! let store = IamStore::new(Arc::new(storage), StoreConfig::default());
//! store.start();
//! let alice = store.get_user(&UserId::from("alice@example.com")).await?;
//! store.shutdown().await;
//! ```

use crate::cache::{CacheStats, UserCache, UserCacheConfig};
use crate::event_tail::{EventTail, EventTailConfig};
use crate::storage::IamStorage;
use iam_core::{
    is_admin, AdminEvent, Clock, EditUser, IamError, IamResult, SystemClock,
    Timestamp, User, UserId,
};
use std::sync::Arc;

/// Default number of users returned by list and search.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Configuration for the store facade and the components it owns.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum users returned by `list_users` and `search_users` (default: 100)
    pub page_size: usize,
    pub cache: UserCacheConfig,
    pub event_tail: EventTailConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache: UserCacheConfig::default(),
            event_tail: EventTailConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache(mut self, cache: UserCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_event_tail(mut self, event_tail: EventTailConfig) -> Self {
        self.event_tail = event_tail;
        self
    }
}

/// Cache-aside user store with an audit trail.
///
/// Cheap to clone; clones share the backend, cache and event tail.
#[derive(Clone)]
pub struct IamStore {
    storage: Arc<dyn IamStorage>,
    cache: UserCache,
    tail: Arc<EventTail>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl IamStore {
    /// Create a store reading time from the system clock.
    pub fn new(storage: Arc<dyn IamStorage>, config: StoreConfig) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock), config)
    }

    pub fn with_clock(storage: Arc<dyn IamStorage>, clock: Arc<dyn Clock>, config: StoreConfig) -> Self {
        let tail = EventTail::new(Arc::clone(&storage), Arc::clone(&clock), config.event_tail);
        Self {
            storage,
            cache: UserCache::new(&config.cache),
            tail: Arc::new(tail),
            clock,
            page_size: config.page_size.max(1),
        }
    }

    /// Start the event tail worker. Idempotent.
    pub fn start(&self) {
        self.tail.start();
    }

    /// Stop the event tail worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.tail.stop().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn event_tail(&self) -> &EventTail {
        &self.tail
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Get a user, checking the cache first.
    pub async fn get_user(&self, id: &UserId) -> IamResult<User> {
        if let Some(user) = self.cache.get(id).await {
            tracing::trace!(user_id = %id, "User cache hit");
            return Ok(user);
        }

        tracing::trace!(user_id = %id, "User cache miss");
        let user = self
            .storage
            .user_get(id)
            .await?
            .ok_or_else(|| IamError::not_found(id))?;
        self.cache.put(user.clone()).await;
        Ok(user)
    }

    /// One page of users ordered by id, strictly after `from`. Not cached.
    pub async fn list_users(&self, from: Option<&UserId>) -> IamResult<Vec<User>> {
        self.storage.user_list(from, self.page_size).await
    }

    /// Users whose display name or id starts with `name_part`. Not cached.
    pub async fn search_users(&self, name_part: &str) -> IamResult<Vec<User>> {
        self.storage.user_search(name_part, self.page_size).await
    }

    /// Whether user `id` holds `role` over `path`.
    pub async fn user_in_role(&self, id: &UserId, path: &str, role: &str) -> IamResult<bool> {
        let user = self.get_user(id).await?;
        Ok(user.is_in_role(role, path))
    }

    /// Audit events strictly after `from`, ascending.
    pub async fn events(&self, from: Option<Timestamp>) -> IamResult<Vec<AdminEvent>> {
        self.tail.query(from).await
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Replace a user's role set. Admin only.
    ///
    /// Creates the user when it does not exist. The role change and its audit
    /// event are committed together.
    pub async fn update_user(&self, caller: Option<&User>, edit: EditUser) -> IamResult<User> {
        let admin = caller
            .filter(|c| is_admin(Some(*c)))
            .ok_or_else(|| IamError::unauthorized("edit user roles"))?;
        if edit.id.is_empty() {
            return Err(IamError::invalid_input("id", "user id must not be empty"));
        }

        let event = self
            .storage
            .user_apply_roles(&edit, &admin.id, self.clock.now())
            .await?;
        tracing::info!(
            admin = %admin.id,
            user_id = %edit.id,
            event_id = event.id,
            roles = edit.roles.len(),
            "User roles updated"
        );

        self.tail.notify();
        self.reload(&edit.id).await
    }

    /// Set a user's display name and profile, activating the account.
    ///
    /// Allowed for admins and for the user themself. Writes no audit event.
    pub async fn enrich_profile(
        &self,
        caller: Option<&User>,
        id: &UserId,
        display_name: &str,
        profile: &str,
    ) -> IamResult<User> {
        let is_self = caller.is_some_and(|c| &c.id == id);
        if !is_self && !is_admin(caller) {
            return Err(IamError::unauthorized("edit another user's profile"));
        }

        let rows = self.storage.user_enrich(id, display_name, profile).await?;
        if rows != 1 {
            return Err(IamError::not_found(id));
        }
        tracing::info!(user_id = %id, "User profile enriched");

        self.reload(id).await
    }

    /// Stamp the caller's access times.
    ///
    /// The first call sets both first and last access; later calls only move
    /// last access.
    pub async fn record_access(&self, caller: Option<&User>) -> IamResult<User> {
        let caller = caller.ok_or(IamError::Unauthenticated)?;
        let now = self.clock.now();
        let first_access = caller.first_access.is_none().then_some(now);

        let rows = self
            .storage
            .user_record_access(&caller.id, first_access, now)
            .await?;
        if rows != 1 {
            return Err(IamError::update_failed(
                &caller.id,
                format!("{} rows affected", rows),
            ));
        }
        tracing::debug!(user_id = %caller.id, first = first_access.is_some(), "Access recorded");

        self.reload(&caller.id).await
    }

    /// Read `id` from the backend and overwrite its cached copy.
    ///
    /// A concurrent miss that read the row before the mutation committed can
    /// still put its older copy after this one; it stays until evicted.
    async fn reload(&self, id: &UserId) -> IamResult<User> {
        match self.storage.user_get(id).await? {
            Some(user) => {
                self.cache.put(user.clone()).await;
                Ok(user)
            }
            None => {
                self.cache.invalidate(id).await;
                Err(IamError::not_found(id))
            }
        }
    }
}

impl std::fmt::Debug for IamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamStore")
            .field("cache", &self.cache)
            .field("tail", &self.tail)
            .field("page_size", &self.page_size)
            .finish()
    }
}
