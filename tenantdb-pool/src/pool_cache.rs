//! Process-wide cache of tenant pools.
//!
//! Wraps a [`TtlCache`] keyed by [`CacheKey`] and adds the broker-wide lock
//! that serializes the check-then-create sequence in the manager and the
//! evict-on-close sequence in [`TenantPool::close`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tenantdb_cache::{CacheKey, CacheStats, TtlCache, TtlCacheConfig};
use tenantdb_core::PoolHandle;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::tenant_pool::TenantPool;

/// Cost charged for one cached pool.
pub const POOL_ENTRY_COST: u64 = 1;

/// Shared map of live tenant pools.
///
/// Lock order: the cache lock is always taken before a pool's own state
/// lock, never the other way round.
pub struct ConnectionCache<H: PoolHandle> {
    lock: Mutex<()>,
    entries: TtlCache<CacheKey, Arc<TenantPool<H>>>,
}

impl<H: PoolHandle> Default for ConnectionCache<H> {
    fn default() -> Self {
        Self::new(TtlCacheConfig::default())
    }
}

impl<H: PoolHandle> ConnectionCache<H> {
    pub fn new(config: TtlCacheConfig) -> Self {
        Self {
            lock: Mutex::new(()),
            entries: TtlCache::new(config),
        }
    }

    /// Acquire the broker-wide lock.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Live pool for `key`, if any. Expired entries read as absent.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<TenantPool<H>>> {
        self.entries.get(key)
    }

    pub(crate) fn insert(&self, key: CacheKey, pool: Arc<TenantPool<H>>, ttl: Duration) -> bool {
        self.entries.set_with_ttl(key, pool, POOL_ENTRY_COST, ttl)
    }

    pub(crate) fn remove(&self, key: &CacheKey) -> Option<Arc<TenantPool<H>>> {
        self.entries.del(key)
    }

    /// Remove the entry for `key` only if it still holds the pool `id`.
    ///
    /// A pool closing late must not evict the replacement that a later
    /// `get_connection` stored under the same key.
    pub(crate) fn remove_pool(&self, key: &CacheKey, id: Uuid) -> bool {
        self.entries.remove_if(key, |pool| pool.id() == id).is_some()
    }

    /// Number of stored pools, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}

impl<H: PoolHandle> fmt::Debug for ConnectionCache<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.entries.stats())
            .finish()
    }
}
