//! Cost-bounded TTL cache.
//!
//! Entries expire passively: an expired entry is dropped when it is next
//! looked up, or when cost pressure forces an eviction. There is no sweeper
//! task and no iteration API.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::stats::{CacheStats, Counters};

/// Default total cost budget (1 GiB worth of cost units).
pub const DEFAULT_MAX_COST: u64 = 1 << 30;

/// Configuration for [`TtlCache`].
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// Upper bound on the summed cost of live entries.
    pub max_cost: u64,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            max_cost: DEFAULT_MAX_COST,
        }
    }
}

impl TtlCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    cost: u64,
    expires_at: Option<Instant>,
    seq: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Thread-safe key/value store with per-entry cost and TTL.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    max_cost: u64,
    total_cost: AtomicU64,
    seq: AtomicU64,
    counters: Counters,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(TtlCacheConfig::default())
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: TtlCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_cost: config.max_cost,
            total_cost: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Look up a live entry. An expired entry is removed and reported as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                Counters::bump(&self.counters.hits);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some((_, entry)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
                self.release(entry.cost);
                Counters::bump(&self.counters.expirations);
            }
        }
        Counters::bump(&self.counters.misses);
        None
    }

    /// Insert `value` under `key`, replacing any previous entry.
    ///
    /// A zero `ttl` means the entry never expires. Returns `false` when the
    /// entry's cost alone exceeds the cache's budget and it was not stored.
    pub fn set_with_ttl(&self, key: K, value: V, cost: u64, ttl: Duration) -> bool {
        if cost > self.max_cost {
            Counters::bump(&self.counters.rejections);
            tracing::warn!(cost, max_cost = self.max_cost, "cache entry rejected: cost exceeds budget");
            return false;
        }

        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        let entry = Entry {
            value,
            cost,
            expires_at,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };

        if let Some(previous) = self.entries.insert(key, entry) {
            self.release(previous.cost);
        }
        self.total_cost.fetch_add(cost, Ordering::Relaxed);
        self.enforce_budget();
        true
    }

    /// Remove the entry for `key`, returning its value if it was present.
    pub fn del<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, entry)| {
            self.release(entry.cost);
            entry.value
        })
    }

    /// Remove the entry for `key` only if `predicate` accepts its value.
    pub fn remove_if<Q>(&self, key: &Q, predicate: impl FnOnce(&V) -> bool) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .remove_if(key, |_, entry| predicate(&entry.value))
            .map(|(_, entry)| {
                self.release(entry.cost);
                entry.value
            })
    }

    /// Number of stored entries, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            total_cost: self.total_cost.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    fn release(&self, cost: u64) {
        let _ = self
            .total_cost
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
                Some(total.saturating_sub(cost))
            });
    }

    /// Evict until the summed cost fits the budget: expired entries first,
    /// then the oldest insertions.
    fn enforce_budget(&self) {
        if self.total_cost.load(Ordering::Relaxed) <= self.max_cost {
            return;
        }

        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.is_expired(now)) {
                self.release(entry.cost);
                Counters::bump(&self.counters.expirations);
            }
        }

        while self.total_cost.load(Ordering::Relaxed) > self.max_cost {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().seq)
                .map(|entry| (entry.key().clone(), entry.value().seq));
            let Some((key, seq)) = oldest else {
                break;
            };
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.seq == seq) {
                self.release(entry.cost);
                Counters::bump(&self.counters.evictions);
            }
        }
    }
}
