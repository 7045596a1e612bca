//! Bounded cache of compiled matchers.
//!
//! Keyed by the raw pattern or keyword string, so identical patterns shared
//! by several policies are compiled once. Entries are `Arc`s inserted whole
//! under the lock; two threads racing on the same key may both compile, and
//! the later insert simply replaces an equivalent matcher.

use crate::policy::{CompiledMatcher, MatcherKind};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key: the matcher kind plus the raw source string.
type MatcherKey = (MatcherKind, String);

/// A cache for compiled matchers.
pub struct MatcherCache {
    entries: Mutex<LruCache<MatcherKey, Arc<CompiledMatcher>>>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl MatcherCache {
    /// Create a new matcher cache holding at most `max_entries` matchers.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached matcher.
    pub fn get(&self, kind: MatcherKind, raw: &str) -> Option<Arc<CompiledMatcher>> {
        let key = (kind, raw.to_string());
        let found = self.entries.lock().get(&key).cloned();

        match found {
            Some(matcher) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(matcher)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a matcher, evicting the least recently used entry when full.
    pub fn put(&self, kind: MatcherKind, raw: &str, matcher: Arc<CompiledMatcher>) {
        self.entries.lock().put((kind, raw.to_string()), matcher);
    }

    /// Return the cached matcher or compile, store and return a new one.
    ///
    /// Compilation runs outside the lock.
    pub fn get_or_compile<F>(&self, kind: MatcherKind, raw: &str, compile: F) -> Arc<CompiledMatcher>
    where
        F: FnOnce() -> CompiledMatcher,
    {
        if let Some(matcher) = self.get(kind, raw) {
            return matcher;
        }

        let matcher = Arc::new(compile());
        self.put(kind, raw, Arc::clone(&matcher));
        matcher
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached matchers.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let entries = self.entries.lock();
        CacheStats {
            hits,
            misses,
            size: entries.len(),
            capacity: entries.cap().get(),
            hit_rate,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Current cache size
    pub size: usize,
    /// Maximum cache size
    pub capacity: usize,
    /// Hit rate percentage
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pattern(raw: &str) -> CompiledMatcher {
        CompiledMatcher::pattern(raw)
    }

    #[test]
    fn test_cache_put_get() {
        let cache = MatcherCache::new(10);
        cache.put(MatcherKind::Pattern, "abc", Arc::new(pattern("abc")));

        let cached = cache.get(MatcherKind::Pattern, "abc").unwrap();
        assert_eq!(cached.source(), "abc");
        assert!(cache.get(MatcherKind::Domain, "abc").is_none());
    }

    #[test]
    fn test_get_or_compile_compiles_once() {
        let cache = MatcherCache::new(10);
        let compiled = AtomicUsize::new(0);

        for _ in 0..3 {
            cache.get_or_compile(MatcherKind::Pattern, r"\d+", || {
                compiled.fetch_add(1, Ordering::SeqCst);
                pattern(r"\d+")
            });
        }

        assert_eq!(compiled.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_eviction_when_full() {
        let cache = MatcherCache::new(2);
        cache.put(MatcherKind::Pattern, "a", Arc::new(pattern("a")));
        cache.put(MatcherKind::Pattern, "b", Arc::new(pattern("b")));
        cache.put(MatcherKind::Pattern, "c", Arc::new(pattern("c")));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(MatcherKind::Pattern, "a").is_none());
        assert!(cache.get(MatcherKind::Pattern, "c").is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = MatcherCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }

    #[test]
    fn test_cache_clear() {
        let cache = MatcherCache::new(10);
        cache.put(MatcherKind::Domain, "x", Arc::new(CompiledMatcher::domain("x")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_compilation() {
        let cache = Arc::new(MatcherCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let matcher =
                        cache.get_or_compile(MatcherKind::Pattern, "foo", || pattern("foo"));
                    matcher.find("a foo b").is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.len(), 1);
    }
}
