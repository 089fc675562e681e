//! Bounded, TTL based store for successful responses.
//!
//! Entries are kept in insertion order; once `capacity` is reached the oldest
//! entry is evicted before a new key is written. Bulk invalidation goes through
//! wildcard patterns which are matched against both entry keys and the tags
//! entries were written under.
use crate::cache::{CacheEntry, CacheOptions, CacheStats};
use regex::Regex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, trace, warn};

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<String>,
    tags: HashMap<String, HashSet<String>>,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            tags: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.order.retain(|k| k != key);
        self.unregister_tags(key, &entry.tags);
        true
    }

    fn unregister_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }

    fn evict_oldest(&mut self) -> Option<String> {
        while let Some(key) = self.order.front().cloned() {
            if self.remove_entry(&key) {
                return Some(key);
            }
            // stale position left behind, drop it
            self.order.pop_front();
        }
        None
    }
}

pub struct ResponseCache<V> {
    state: Mutex<CacheState<V>>,
    options: CacheOptions,
}

impl<V> Default for ResponseCache<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl<V> ResponseCache<V>
where
    V: Clone,
{
    pub fn new(options: CacheOptions) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            options: CacheOptions {
                capacity: options.capacity.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // every mutation leaves the state consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the value for `key`, dropping it first if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.lock();
        let now = Instant::now();

        let expired = match state.entries.get(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove_entry(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            trace!("cache entry expired: {}", key);
            return None;
        }

        state.stats.hits += 1;
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        let state = self.lock();
        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Inserts or overwrites `key`. Overwrites keep the key's original
    /// position in the eviction order. `ttl` falls back to the configured
    /// default and every tag in `tags` is registered for bulk invalidation.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        tags: &[String],
    ) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.options.default_ttl);
        let mut state = self.lock();

        let is_new = !state.entries.contains_key(&key);
        if is_new {
            if state.entries.len() >= self.options.capacity {
                if let Some(evicted) = state.evict_oldest() {
                    state.stats.evictions += 1;
                    debug!("cache full, evicted oldest entry: {}", evicted);
                }
            }
        } else if let Some(previous) = state.entries.remove(&key) {
            // re-registered below with the new tag set
            state.unregister_tags(&key, &previous.tags);
        }

        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique_tags.contains(tag) {
                unique_tags.push(tag.clone());
            }
        }
        for tag in &unique_tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }

        if is_new {
            state.order.push_back(key.clone());
        }
        state
            .entries
            .insert(key, CacheEntry::new(value, ttl, unique_tags));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove_entry(key)
    }

    /// Deletes every entry whose key matches `pattern`, and every entry
    /// written under a tag whose text matches it. `*` matches anything, other
    /// characters are literal and the match is unanchored.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let matcher = match compile_pattern(pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                // nothing may stay stale, so fall back to dropping everything
                warn!(
                    "Invalid cache pattern {:?} ({}), clearing the whole cache",
                    pattern, e
                );
                let removed = self.len();
                self.clear();
                return removed;
            }
        };

        let mut state = self.lock();
        let mut doomed: HashSet<String> = state
            .entries
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();

        let matched_tags: Vec<String> = state
            .tags
            .keys()
            .filter(|tag| matcher.is_match(tag))
            .cloned()
            .collect();
        for tag in matched_tags {
            if let Some(keys) = state.tags.remove(&tag) {
                doomed.extend(keys);
            }
        }

        let removed = doomed
            .iter()
            .filter(|key| state.remove_entry(key))
            .count();
        state.stats.invalidations += removed as u64;
        debug!("invalidated {} cache entries for pattern {:?}", removed, pattern);
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        state.tags.clear();
    }

    /// Removes every expired entry and returns how many were dropped.
    /// Live entries are left untouched.
    pub fn cleanup(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove_entry(key);
        }
        state.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!("cache cleanup removed {} expired entries", expired.len());
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats.clone()
        }
    }
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + 'static,
{
    /// Starts the periodic sweep. The returned handle stops it when dropped;
    /// the sweep also ends on its own once the cache itself is dropped.
    pub fn start_cleanup(self: &Arc<Self>, every: Duration) -> CleanupHandle {
        let cache = Arc::downgrade(self);
        let handle = tokio::spawn(cleanup_loop(cache, every));
        CleanupHandle {
            handle: Some(handle),
        }
    }
}

async fn cleanup_loop<V>(cache: Weak<ResponseCache<V>>, every: Duration)
where
    V: Clone + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else {
            debug!("cache dropped, stopping cleanup loop");
            return;
        };
        cache.cleanup();
    }
}

impl<V> std::fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ResponseCache")
            .field("size", &state.entries.len())
            .field("tags", &state.tags.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Owner of the background sweep started by [`ResponseCache::start_cleanup`].
#[derive(Debug)]
pub struct CleanupHandle {
    handle: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn stop(mut self) {
        self.abort();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Compiles a wildcard pattern into an unanchored regex.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let source = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn small_cache(capacity: usize) -> ResponseCache<u32> {
        ResponseCache::new(CacheOptions {
            capacity,
            ..CacheOptions::default()
        })
    }

    #[test]
    fn test_set_then_get() {
        let cache = ResponseCache::default();
        cache.set("users:1", 1u32, None, &[]);
        assert_eq!(cache.get("users:1"), Some(1));
        assert_eq!(cache.get("users:2"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResponseCache::default();
        cache.set("k", 1u32, None, &tags(&["a"]));
        cache.set("k", 2u32, None, &tags(&["b"]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(2));

        // the old tag no longer points at the key
        assert_eq!(cache.invalidate_by_pattern("a"), 0);
        assert_eq!(cache.invalidate_by_pattern("b"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = ResponseCache::default();
        cache.set("short", 7u32, Some(Duration::from_secs(10)), &[]);
        assert_eq!(cache.get("short"), Some(7));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("short"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_is_five_minutes() {
        let cache = ResponseCache::default();
        cache.set("k", 1u32, None, &[]);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("k"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = small_cache(100);
        for i in 0..=100u32 {
            cache.set(format!("key:{i}"), i, None, &[]);
        }

        assert_eq!(cache.len(), 100);
        assert_eq!(cache.get("key:0"), None);
        assert_eq!(cache.get("key:1"), Some(1));
        assert_eq!(cache.get("key:100"), Some(100));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = small_cache(2);
        cache.set("a", 1u32, None, &[]);
        cache.set("b", 2u32, None, &[]);
        cache.set("a", 3u32, None, &[]);
        assert_eq!(cache.len(), 2);

        cache.set("c", 4u32, None, &[]);
        assert_eq!(cache.get("a"), None, "a is still the oldest insertion");
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(4));
    }

    #[test]
    fn test_invalidate_by_key_pattern() {
        let cache = ResponseCache::default();
        cache.set("GET:/users/list:{}:", 1u32, None, &[]);
        cache.set("GET:/users/7:{}:", 2u32, None, &[]);
        cache.set("GET:/reports:{}:", 3u32, None, &[]);

        assert_eq!(cache.invalidate_by_pattern("/users"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("GET:/reports:{}:"), Some(3));
    }

    #[test]
    fn test_invalidate_through_tags() {
        let cache = ResponseCache::default();
        cache.set("databases:42", 1u32, None, &tags(&["databases"]));
        cache.set("opaque-key", 2u32, None, &tags(&["databases", "tables"]));
        cache.set("other", 3u32, None, &[]);

        let removed = cache.invalidate_by_pattern("databases");
        assert!(removed >= 1);
        assert_eq!(removed, 2);
        assert_eq!(cache.get("databases:42"), None);
        assert_eq!(cache.get("opaque-key"), None);
        assert_eq!(cache.get("other"), Some(3));
    }

    #[test]
    fn test_wildcard_pattern() {
        let cache = ResponseCache::default();
        cache.set("GET:/mssql-config/1/tables", 1u32, None, &[]);
        cache.set("GET:/mssql-config/2/tables", 2u32, None, &[]);
        cache.set("GET:/mssql-config/2", 3u32, None, &[]);

        assert_eq!(cache.invalidate_by_pattern("mssql-config/*/tables"), 2);
        assert_eq!(cache.get("GET:/mssql-config/2"), Some(3));
        assert_eq!(cache.invalidate_by_pattern("*"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pattern_characters_are_literal() {
        let cache = ResponseCache::default();
        cache.set("GET:/search?q=a.b", 1u32, None, &[]);
        cache.set("GET:/search?q=axb", 2u32, None, &[]);

        assert_eq!(cache.invalidate_by_pattern("q=a.b"), 1);
        assert_eq!(cache.get("GET:/search?q=axb"), Some(2));
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::default();
        cache.set("a", 1u32, None, &tags(&["t"]));
        cache.set("b", 2u32, None, &[]);
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        assert_eq!(cache.invalidate_by_pattern("t"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_only_drops_expired() {
        let cache = ResponseCache::default();
        cache.set("short", 1u32, Some(Duration::from_secs(1)), &[]);
        cache.set("long", 2u32, Some(Duration::from_secs(600)), &[]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.cleanup(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup() {
        let cache = Arc::new(ResponseCache::default());
        cache.set("short", 1u32, Some(Duration::from_secs(1)), &[]);
        let handle = cache.start_cleanup(Duration::from_secs(300));
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(301)).await;
        // the sweep removed it without a lookup
        assert_eq!(cache.len(), 0);

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_with_cache() {
        let cache = Arc::new(ResponseCache::<u32>::default());
        let handle = cache.start_cleanup(Duration::from_secs(1));
        drop(cache);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_running());
    }

    #[test]
    fn test_compile_pattern() {
        let re = compile_pattern("users*access").unwrap();
        assert!(re.is_match("GET:/users/7/access"));
        assert!(!re.is_match("GET:/access/users"));
        assert!(compile_pattern("").unwrap().is_match("anything"));
    }
}
