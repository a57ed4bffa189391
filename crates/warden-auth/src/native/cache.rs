//! Bounded in-memory cache of parsed metadata records.
//!
//! Each native store owns exactly one [`MetadataCache`]. Entries are keyed by
//! record name and remember when they were last fetched from the backing store.
//!
//! # Ordering
//!
//! [`MetadataCache::put`] overwrites unconditionally: for a given name the
//! last call wins. Sequencing between the reload scheduler, the invalidation
//! coordinator and the facade is the callers' concern. The one exception is
//! [`MetadataCache::put_if_unchanged`], used on the foreground miss path so a
//! record fetched before a concurrent clear is never re-installed.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use time::OffsetDateTime;

use crate::config::CacheConfig;

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached record plus the time it was fetched from the backing store.
#[derive(Debug)]
pub struct CacheEntry<R> {
    /// The parsed record, shared with readers.
    pub record: Arc<R>,
    /// Wall-clock fetch time, for reporting.
    pub fetched_at: OffsetDateTime,
    fetched: Instant,
}

impl<R> CacheEntry<R> {
    fn new(record: Arc<R>) -> Self {
        Self {
            record,
            fetched_at: OffsetDateTime::now_utc(),
            fetched: Instant::now(),
        }
    }

    /// Time since the record was fetched.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched.elapsed()
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.fetched.elapsed() > ttl)
    }
}

impl<R> Clone for CacheEntry<R> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            fetched_at: self.fetched_at,
            fetched: self.fetched,
        }
    }
}

// =============================================================================
// Metadata Cache
// =============================================================================

/// Concurrent, bounded cache of records keyed by name.
///
/// Lookups are O(1) on average and readers never block each other.
pub struct MetadataCache<R> {
    entries: DashMap<String, CacheEntry<R>>,
    max_entries: usize,
    ttl: Option<Duration>,

    /// Bumped by every removal; see [`MetadataCache::put_if_unchanged`].
    generation: AtomicU64,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<R> MetadataCache<R> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl(),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the cached record, or `None` on a miss or expired entry.
    pub fn get(&self, name: &str) -> Option<Arc<R>> {
        let found = match self.entries.get(name) {
            Some(entry) if !entry.is_expired(self.ttl) => Some(Arc::clone(&entry.record)),
            Some(entry) => {
                drop(entry);
                self.entries.remove_if(name, |_, e| e.is_expired(self.ttl));
                None
            }
            None => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Returns the full entry without touching hit/miss counters.
    pub fn entry(&self, name: &str) -> Option<CacheEntry<R>> {
        self.entries.get(name).map(|e| e.clone())
    }

    /// Inserts or replaces the record for `name`, refreshing its timestamp.
    pub fn put(&self, name: impl Into<String>, record: Arc<R>) {
        let name = name.into();
        if !self.entries.contains_key(&name) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(name, CacheEntry::new(record));
    }

    /// Inserts `record` unless a removal happened since `generation` was read.
    ///
    /// Returns `true` if the record stayed in the cache.
    pub fn put_if_unchanged(&self, name: &str, record: Arc<R>, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.put(name, Arc::clone(&record));

        // A clear that ran between the check and the insert bumped the
        // generation first; take our entry back out.
        if self.generation() != generation {
            self.entries
                .remove_if(name, |_, e| Arc::ptr_eq(&e.record, &record));
            return false;
        }
        true
    }

    /// Removes one entry. Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(name).is_some()
    }

    /// Removes every entry present at call time. Returns how many were removed.
    pub fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter(|name| self.entries.remove(name.as_str()).is_some())
            .count()
    }

    /// Removes the named entries. Returns how many were present.
    pub fn clear_names<'a, I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.generation.fetch_add(1, Ordering::SeqCst);
        names
            .into_iter()
            .filter(|name| self.entries.remove(*name).is_some())
            .count()
    }

    /// Removes entries whose names are not in `keep`. Returns how many were removed.
    pub fn retain_names(&self, keep: &HashSet<String>) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !keep.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        if stale.is_empty() {
            return 0;
        }
        self.clear_names(stale.iter().map(String::as_str))
    }

    /// Returns every cached `(name, record)` pair ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Arc<R>)> {
        let mut items: Vec<(String, Arc<R>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().record)))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    /// Returns `true` if `name` is cached (expired or not).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current removal generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            generation: self.generation(),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().fetched)
            .map(|e| e.key().clone());

        if let Some(name) = oldest {
            if self.entries.remove(&name).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(name = %name, "Evicted oldest cache entry");
            }
        }
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Statistics about a metadata cache.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Number of cached entries.
    pub entries: usize,
    /// Capacity bound.
    pub max_entries: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed or found an expired entry.
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Removal generation.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize) -> MetadataCache<String> {
        MetadataCache::new(&CacheConfig {
            max_entries,
            ttl: Duration::ZERO,
        })
    }

    fn value(s: &str) -> Arc<String> {
        Arc::new(s.to_string())
    }

    #[test]
    fn test_put_get_overwrites() {
        let cache = cache(10);
        assert!(cache.get("r1").is_none());

        cache.put("r1", value("v1"));
        cache.put("r1", value("v2"));

        assert_eq!(cache.get("r1").as_deref().map(String::as_str), Some("v2"));
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let cache = cache(10);
        assert!(!cache.remove("missing"));
        assert_eq!(cache.clear_names(["a", "b"]), 0);
        assert_eq!(cache.clear(), 0);
    }

    #[test]
    fn test_clear_names_only_touches_named() {
        let cache = cache(10);
        for name in ["r1", "r2", "r3"] {
            cache.put(name, value(name));
        }

        assert_eq!(cache.clear_names(["r2", "zz"]), 1);
        assert!(cache.contains("r1"));
        assert!(!cache.contains("r2"));
        assert!(cache.contains("r3"));

        // Idempotent
        assert_eq!(cache.clear_names(["r2"]), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_all() {
        let cache = cache(10);
        cache.put("a", value("a"));
        cache.put("b", value("b"));
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let cache = cache(10);
        for name in ["c", "a", "b"] {
            cache.put(name, value(name));
        }
        let names: Vec<String> = cache.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = cache(2);
        cache.put("a", value("a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", value("b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.put("c", value("c"));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().evictions, 1);

        // Replacing an existing key never evicts
        cache.put("c", value("c2"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_expiry_reports_miss() {
        let cache: MetadataCache<String> = MetadataCache::new(&CacheConfig {
            max_entries: 10,
            ttl: Duration::from_millis(5),
        });
        cache.put("a", value("a"));
        assert!(cache.get("a").is_some());

        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get("a").is_none());
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_put_if_unchanged_refuses_after_clear() {
        let cache = cache(10);
        let generation = cache.generation();
        cache.clear_names(["a"]);

        assert!(!cache.put_if_unchanged("a", value("old"), generation));
        assert!(!cache.contains("a"));

        let generation = cache.generation();
        assert!(cache.put_if_unchanged("a", value("new"), generation));
        assert!(cache.contains("a"));
    }

    #[test]
    fn test_retain_names() {
        let cache = cache(10);
        for name in ["a", "b", "c"] {
            cache.put(name, value(name));
        }
        let keep: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        assert_eq!(cache.retain_names(&keep), 1);
        assert!(!cache.contains("b"));
        assert_eq!(cache.retain_names(&keep), 0);
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        let cache = Arc::new(cache(1_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let name = format!("r{}", i % 20);
                        if t % 2 == 0 {
                            cache.put(name.clone(), Arc::new(format!("{t}-{i}")));
                        } else {
                            let _ = cache.get(&name);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 20);
    }
}
