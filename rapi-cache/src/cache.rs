use derive_builder::Builder;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A cached value together with its expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached payload
    pub value: T,
    /// Instant after which the entry is considered gone
    pub expires_at: Instant,
    /// Invalidation tags the entry was written under
    pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration, tags: Vec<String>) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            tags,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

#[derive(Builder, Clone, Debug)]
#[builder(public, setter(into))]
pub struct CacheOptions {
    /// Maximum number of resident entries, writes past it evict the oldest.
    #[builder(default = "DEFAULT_CAPACITY")]
    pub capacity: usize,
    #[builder(default = "DEFAULT_TTL")]
    pub default_ttl: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}
