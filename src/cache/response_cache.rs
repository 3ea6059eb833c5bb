//! Bounded TTL cache with strict LRU eviction.
//!
//! Recency is tracked with a monotonically increasing access tick. Each entry
//! remembers its latest tick and an ordered index maps ticks back to keys, so
//! the eviction victim is always the first index entry.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    access_tick: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.access_tick);
        Some(entry)
    }

    fn evict_least_recent(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

/// Cache counters for dashboards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new()),
            max_size: max_size.max(1),
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.default_ttl())
    }

    /// Return the cached value if present and not expired. Counts as an access.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            inner.remove_entry(key);
            inner.expirations += 1;
            inner.misses += 1;
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        let tick = inner.tick();
        let entry = inner.entries.get_mut(key)?;
        let previous_tick = std::mem::replace(&mut entry.access_tick, tick);
        let value = entry.value.clone();
        inner.recency.remove(&previous_tick);
        inner.recency.insert(tick, key.to_string());
        inner.hits += 1;
        Some(value)
    }

    /// Whether a fresh entry exists. Does not count as an access.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Insert or overwrite with the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite. A new key arriving at capacity first evicts the
    /// least-recently-accessed entry.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock();

        if inner.remove_entry(&key).is_none() && inner.entries.len() >= self.max_size {
            if let Some(evicted) = inner.evict_least_recent() {
                debug!(evicted = %evicted, "Cache at capacity, evicted least recently used entry");
            }
        }

        let tick = inner.tick();
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                access_tick: tick,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.lock().remove_entry(key).map(|entry| entry.value)
    }

    /// Remove every entry, or only those whose key contains `pattern`.
    /// Returns the number of entries removed.
    pub fn clear(&self, pattern: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        let removed = match pattern {
            None => {
                let count = inner.entries.len();
                inner.entries.clear();
                inner.recency.clear();
                count
            }
            Some(pattern) => {
                let keys: Vec<String> = inner
                    .entries
                    .keys()
                    .filter(|key| key.contains(pattern))
                    .cloned()
                    .collect();
                for key in &keys {
                    inner.remove_entry(key);
                }
                keys.len()
            }
        };
        drop(inner);

        info!(removed = removed, pattern = pattern, "🧹 CACHE: Cleared entries");
        removed
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove_entry(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    /// Memoize `compute` under `key`. Errors are returned and not cached.
    ///
    /// The lock is not held while `compute` runs, so concurrent misses for the
    /// same key may each compute; the last write wins.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use batch_notify::cache::ResponseCache;
    ///
    /// # tokio_test::block_on(async {
    /// let cache: ResponseCache<u32> = ResponseCache::new(10, Duration::from_secs(60));
    /// let first = cache
    ///     .get_or_try_insert_with("answer", || async { Ok::<_, String>(42) })
    ///     .await;
    /// assert_eq!(first, Ok(42));
    ///
    /// // Served from the cache, the closure is not called again
    /// let second = cache
    ///     .get_or_try_insert_with("answer", || async { Err("not called".to_string()) })
    ///     .await;
    /// assert_eq!(second, Ok(42));
    /// assert_eq!(cache.stats().hits, 1);
    /// # });
    /// ```
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> ResponseCache<String> {
        ResponseCache::new(max_size, Duration::from_secs(60))
    }

    #[test]
    fn test_get_returns_fresh_values() {
        let cache = cache(10);
        cache.set("user:1", "alice".to_string());
        assert_eq!(cache.get("user:1").as_deref(), Some("alice"));
        assert_eq!(cache.get("user:2"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entries_are_deleted_on_access() {
        let cache = cache(10);
        cache.set_with_ttl("short", "v".to_string(), Duration::from_millis(10));
        cache.set("long", "v".to_string());
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_eviction_is_by_last_access_not_insertion() {
        let cache = cache(3);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());

        // Touch "a" so "b" becomes least recently accessed
        assert!(cache.get("a").is_some());
        assert!(cache.contains_key("b"));
        cache.set("d", "4".to_string());

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(2);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "updated".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("updated"));
        assert!(cache.get("b").is_some());
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_clear_by_substring_pattern() {
        let cache = cache(10);
        cache.set("test:42:summary", "x".to_string());
        cache.set("test:42:results", "y".to_string());
        cache.set("course:7", "z".to_string());

        assert_eq!(cache.clear(Some("test:42")), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("course:7").is_some());

        assert_eq!(cache.clear(None), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(10);
        cache.set_with_ttl("a", "1".to_string(), Duration::ZERO);
        cache.set_with_ttl("b", "2".to_string(), Duration::ZERO);
        cache.set("c", "3".to_string());
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memoize_only_computes_on_miss() {
        let cache = cache(10);
        let mut calls = 0;

        let first: Result<String, String> = cache
            .get_or_try_insert_with("report", || {
                calls += 1;
                async { Ok("expensive".to_string()) }
            })
            .await;
        assert_eq!(first.unwrap(), "expensive");

        let second: Result<String, String> = cache
            .get_or_try_insert_with("report", || {
                calls += 1;
                async { Ok("recomputed".to_string()) }
            })
            .await;
        assert_eq!(second.unwrap(), "expensive");
        assert_eq!(calls, 1);

        let failed: Result<String, String> = cache
            .get_or_try_insert_with("other", || async { Err("db down".to_string()) })
            .await;
        assert!(failed.is_err());
        assert!(cache.get("other").is_none());
    }
}
