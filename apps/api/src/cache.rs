//! Content Cache — TTL + LRU map from normalized-content hash to an expensive
//! artifact (embeddings today).
//!
//! Recency is tracked with a monotonically increasing access tick: the entry
//! map stores each key's current tick, and an ordered tick → key index gives
//! the least-recently-used key as its first element. A second index ordered
//! by expiry time lets `set` and `len` drop stale entries without a scan, so
//! an expired entry never holds a slot a live one could use. Everything runs
//! under one mutex.
//!
//! The cache never surfaces an error. A poisoned lock is logged and treated
//! as a miss (or a dropped write).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::text::normalize_content;

/// Namespace for embedding vectors.
pub const EMBEDDING_NAMESPACE: &str = "embedding";

/// Cache key: namespace tag + SHA-256 of the normalized content. Distinct
/// namespaces never collide even for identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: &'static str,
    digest: String,
}

impl CacheKey {
    pub fn for_content(namespace: &'static str, content: &str) -> Self {
        let normalized = normalize_content(content);
        let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
        Self { namespace, digest }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.digest)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Recency position; changes on every hit.
    tick: u64,
    /// Tick assigned at insert; with `expires_at` it keys the expiry index.
    inserted: u64,
}

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    recency: BTreeMap<u64, CacheKey>,
    expiries: BTreeMap<(Instant, u64), CacheKey>,
    next_tick: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            expiries: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.expiries.remove(&(entry.expires_at, entry.inserted));
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<CacheKey> {
        let key = self.recency.first_key_value().map(|(_, k)| k.clone())?;
        self.remove(&key);
        Some(key)
    }

    /// Drops every entry whose TTL has elapsed at `now`.
    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((&(expires_at, _), key)) = self.expiries.first_key_value() {
            if expires_at > now {
                break;
            }
            let key = key.clone();
            self.remove(&key);
            purged += 1;
        }
        purged
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.expiries.clear();
    }
}

pub struct ContentCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
    max_size: usize,
}

impl<V: Clone> ContentCache<V> {
    /// A `max_size` of zero disables storage: every `get` misses.
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            ttl,
            max_size,
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, CacheState<V>>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Content cache lock poisoned; treating as miss");
                None
            }
        }
    }

    /// Returns the cached value and marks it most-recently-used. An expired
    /// entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.lock()?;
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            state.remove(key);
            debug!("Cache entry {key} expired");
            return None;
        }

        let tick = state.bump_tick();
        let old_tick = {
            let entry = state.entries.get_mut(key)?;
            std::mem::replace(&mut entry.tick, tick)
        };
        state.recency.remove(&old_tick);
        state.recency.insert(tick, key.clone());

        state.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts with a fresh TTL. Expired entries are dropped first; if the
    /// cache is still full, the least-recently-used entry is evicted.
    pub fn set(&self, key: CacheKey, value: V) {
        if self.max_size == 0 {
            return;
        }
        let Some(mut state) = self.lock() else {
            return;
        };

        let now = Instant::now();
        // Replacing an existing key never needs an eviction.
        state.remove(&key);
        let purged = state.purge_expired(now);
        if purged > 0 {
            debug!("Dropped {purged} expired cache entries");
        }

        while state.entries.len() >= self.max_size {
            match state.evict_lru() {
                Some(evicted) => debug!("Evicted LRU cache entry {evicted}"),
                None => break,
            }
        }

        let tick = state.bump_tick();
        let expires_at = now + self.ttl;
        state.recency.insert(tick, key.clone());
        state.expiries.insert((expires_at, tick), key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                tick,
                inserted: tick,
            },
        );
    }

    pub fn clear(&self) {
        if let Some(mut state) = self.lock() {
            state.clear();
        }
    }

    /// Number of live entries. Expired ones are dropped before counting.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|mut s| {
                s.purge_expired(Instant::now());
                s.entries.len()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(content: &str) -> CacheKey {
        CacheKey::for_content(EMBEDDING_NAMESPACE, content)
    }

    #[test]
    fn test_key_ignores_markup_case_and_whitespace() {
        assert_eq!(key("<p>Rust   Engineer</p>"), key("rust engineer"));
        assert_ne!(key("rust engineer"), key("go engineer"));
    }

    #[test]
    fn test_namespaces_never_collide() {
        let a = CacheKey::for_content("embedding", "same text");
        let b = CacheKey::for_content("narrative", "same text");
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("embedding:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_set_within_ttl() {
        let cache = ContentCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&key("a")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_miss_and_removed() {
        let cache = ContentCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refreshes_ttl() {
        let cache = ContentCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.set(key("a"), 2);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get(&key("a")), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_stop_counting_without_a_get() {
        let cache = ContentCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set(key("c"), 3);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("c")), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_drops_expired_before_evicting_live() {
        let cache = ContentCache::new(Duration::from_secs(60), 2);
        cache.set(key("x"), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set(key("y"), 2);
        tokio::time::advance(Duration::from_secs(20)).await;
        // "x" becomes most recently used, but still expires at t=60.
        assert_eq!(cache.get(&key("x")), Some(1));
        tokio::time::advance(Duration::from_secs(20)).await;

        cache.set(key("z"), 3);
        assert_eq!(cache.get(&key("y")), Some(2));
        assert_eq!(cache.get(&key("z")), Some(3));
        assert_eq!(cache.get(&key("x")), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_size_never_exceeds_max_and_keeps_most_recent() {
        let cache = ContentCache::new(Duration::from_secs(60), 3);
        for i in 0..10 {
            cache.set(key(&format!("doc {i}")), i);
        }
        assert_eq!(cache.len(), 3);
        for i in 7..10 {
            assert_eq!(cache.get(&key(&format!("doc {i}"))), Some(i));
        }
        for i in 0..7 {
            assert_eq!(cache.get(&key(&format!("doc {i}"))), None);
        }
    }

    #[test]
    fn test_get_marks_most_recently_used() {
        let cache = ContentCache::new(Duration::from_secs(60), 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.set(key("c"), 3);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("c")), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ContentCache::new(Duration::from_secs(60), 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("a"), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("b")), Some(2));
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = ContentCache::new(Duration::from_secs(60), 5);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&key("a")), None);
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let cache = ContentCache::new(Duration::from_secs(60), 0);
        cache.set(key("a"), 1);
        assert_eq!(cache.get(&key("a")), None);
    }

    #[test]
    fn test_concurrent_writers_respect_capacity() {
        use std::sync::Arc;

        let cache = Arc::new(ContentCache::new(Duration::from_secs(60), 16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(key(&format!("{t}-{i}")), i);
                        let _ = cache.get(&key(&format!("{t}-{}", i / 2)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
