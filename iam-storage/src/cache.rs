//! In-process user cache.
//!
//! A bounded, concurrent cache keyed by user id. Admission and eviction are
//! delegated to moka (TinyLFU admission, LRU eviction), so a `put` may be
//! silently rejected and a later `get` may miss. Callers must treat it as an
//! optimisation only: the backend stays the source of truth.

use iam_core::{User, UserId};
use moka::future::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of users kept in memory.
pub const DEFAULT_USER_CACHE_CAPACITY: u64 = 1_000;

/// Configuration for the user cache.
#[derive(Debug, Clone)]
pub struct UserCacheConfig {
    /// Maximum total cost of cached entries. Every user costs 1.
    pub capacity: u64,
}

impl Default for UserCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_USER_CACHE_CAPACITY,
        }
    }
}

impl UserCacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Approximate number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded cache of user records keyed by id.
#[derive(Clone)]
pub struct UserCache {
    inner: Cache<UserId, User>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl UserCache {
    pub fn new(config: &UserCacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .name("users")
                .max_capacity(config.capacity)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a user. A miss is not an error.
    pub async fn get(&self, id: &UserId) -> Option<User> {
        let found = self.inner.get(id).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Offer a user to the cache, keyed by its id. May be rejected.
    pub async fn put(&self, user: User) {
        self.inner.insert(user.id.clone(), user).await;
    }

    /// Drop the entry for `id` if present.
    pub async fn invalidate(&self, id: &UserId) {
        self.inner.invalidate(id).await;
    }

    /// Flush pending admission and eviction work.
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.inner.entry_count(),
        }
    }
}

impl std::fmt::Debug for UserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_core::Role;

    fn user(name: &str) -> User {
        User::new(format!("{}@example.com", name), vec![Role::new("reader", "/")])
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = UserCache::new(&UserCacheConfig::default());
        let alice = user("alice");

        assert!(cache.get(&alice.id).await.is_none());
        cache.put(alice.clone()).await;
        assert_eq!(cache.get(&alice.id).await, Some(alice));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = UserCache::new(&UserCacheConfig::default());
        let bob = user("bob");
        cache.put(bob.clone()).await;
        cache.invalidate(&bob.id).await;
        assert!(cache.get(&bob.id).await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let cache = UserCache::new(&UserCacheConfig::default());
        let mut carol = user("carol");
        cache.put(carol.clone()).await;
        carol.active = true;
        cache.put(carol.clone()).await;
        assert_eq!(cache.get(&carol.id).await, Some(carol));
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = UserCache::new(&UserCacheConfig::new().with_capacity(10));
        for i in 0..200 {
            cache.put(user(&format!("u{}", i))).await;
        }
        cache.sync().await;
        assert!(cache.stats().entry_count <= 10);
    }

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
