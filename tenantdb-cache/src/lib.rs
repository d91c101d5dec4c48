//! TenantDB Cache - process-wide TTL store
//!
//! A generic key/value cache with per-entry cost and TTL, plus the versioned
//! [`CacheKey`] used to slot tenant pools.
//!
//! # Expiry
//!
//! Expiry is passive. Nothing sweeps the cache in the background; an entry
//! past its TTL is removed on its next lookup or when a later insert pushes
//! the summed cost over budget. Callers needing "close everything" semantics
//! must track their own entries.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tenantdb_cache::{CacheKey, TtlCache};
//!
//! let cache: TtlCache<CacheKey, u32> = TtlCache::default();
//! let key = CacheKey::for_tenant("acme");
//! cache.set_with_ttl(key.clone(), 7, 1, Duration::from_secs(55 * 60));
//! assert_eq!(cache.get(&key), Some(7));
//! ```

pub mod key;
pub mod stats;
pub mod ttl;

pub use key::{CacheKey, CACHE_KEY_PREFIX, CACHE_KEY_VERSION};
pub use stats::CacheStats;
pub use ttl::{TtlCache, TtlCacheConfig, DEFAULT_MAX_COST};
