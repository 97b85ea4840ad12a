//! Generic bounded cache for derived data with negative-result expiry.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use serde::Serialize;

use crate::error::ViewError;
use crate::observability::CACHE_LOOKUPS;

type CachedResult<V> = std::result::Result<V, ViewError>;

/// Successful values live until evicted by capacity; errors expire after
/// `error_ttl` so they are retried eventually but not on every query.
struct NegativeResultExpiry {
    error_ttl: Duration,
}

impl<K, V> Expiry<K, CachedResult<V>> for NegativeResultExpiry {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &CachedResult<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.is_err().then_some(self.error_ttl)
    }
}

/// Lookup counters for one cache.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// A bounded memo table from `K` to a computed `V` or the error computing it.
pub struct DerivedDataCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    name: &'static str,
    cache: Cache<K, CachedResult<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> DerivedDataCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: &'static str, max_items: u64, error_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_items)
            .expire_after(NegativeResultExpiry { error_ttl })
            .build();
        Self {
            name,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the memoized result for `key`, computing it on a miss.
    ///
    /// Concurrent lookups of the same key share a single computation.
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) error produced by `compute`.
    pub fn get<F>(&self, key: K, compute: F) -> CachedResult<V>
    where
        F: FnOnce(&K) -> CachedResult<V>,
    {
        let lookup = key.clone();
        let entry = self.cache.entry(key).or_insert_with(|| compute(&lookup));
        if entry.is_fresh() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            CACHE_LOOKUPS.with_label_values(&[self.name, "miss"]).inc();
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            CACHE_LOOKUPS.with_label_values(&[self.name, "hit"]).inc();
        }
        entry.into_value()
    }

    /// Look up without computing.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<CachedResult<V>> {
        self.cache.get(key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
