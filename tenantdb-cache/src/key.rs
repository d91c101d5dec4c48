//! Versioned cache keys for tenant pools.
//!
//! A `CacheKey` can only be built from a tenant key, and always carries the
//! generation tag of the pool shape it refers to. Pools from different
//! generations therefore never share a slot.

use std::fmt;

/// Fixed literal prefix shared by every pool cache key.
pub const CACHE_KEY_PREFIX: &str = "con-";

/// Generation tag of the current pool implementation.
pub const CACHE_KEY_VERSION: &str = "v2-";

/// A cache key scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: String,
    prefix_len: usize,
}

impl CacheKey {
    /// Key for `tenant` in the current generation: `con-v2-<tenant>`.
    pub fn for_tenant(tenant: &str) -> Self {
        Self::with_version(CACHE_KEY_VERSION, tenant)
    }

    /// Key for `tenant` under an explicit generation tag.
    pub fn with_version(version: &str, tenant: &str) -> Self {
        let prefix_len = CACHE_KEY_PREFIX.len() + version.len();
        let mut inner = String::with_capacity(prefix_len + tenant.len());
        inner.push_str(CACHE_KEY_PREFIX);
        inner.push_str(version);
        inner.push_str(tenant);
        Self { inner, prefix_len }
    }

    /// The tenant key this cache key was derived from.
    pub fn tenant(&self) -> &str {
        &self.inner[self.prefix_len..]
    }

    /// The generation tag, e.g. `v2-`.
    pub fn version(&self) -> &str {
        &self.inner[CACHE_KEY_PREFIX.len()..self.prefix_len]
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}
