//! TTL + LRU result cache keyed by content fingerprint.

use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::Fingerprint;
use crate::errors::ValidationError;

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a stage does not declare one.
    pub default_ttl_ms: u64,
    /// Maximum live entries; the least recently used entry is evicted beyond it.
    pub max_entries: Option<usize>,
    /// Interval of the background expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 3_600_000,
            max_entries: Some(1024),
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// Creates a cache config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl_ms(mut self, ttl: u64) -> Self {
        self.default_ttl_ms = ttl;
        self
    }

    /// Sets the entry limit.
    #[must_use]
    pub fn with_max_entries(mut self, max: Option<usize>) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval_ms(mut self, interval: u64) -> Self {
        self.sweep_interval_ms = interval;
        self
    }

    /// Default TTL as a duration.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_ttl_ms == 0 {
            return Err(ValidationError::for_field(
                "cache.default_ttl_ms",
                "must be positive",
            ));
        }
        if self.max_entries == Some(0) {
            return Err(ValidationError::for_field(
                "cache.max_entries",
                "must be positive when set",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ValidationError::for_field(
                "cache.sweep_interval_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from a live entry.
    pub hits: u64,
    /// Lookups that computed and stored a new value.
    pub misses: u64,
    /// Entries removed to respect `max_entries`.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Live entries at snapshot time.
    pub entries: usize,
}

impl CacheStats {
    /// Hit ratio over hits + misses.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Shared result cache.
///
/// Expired entries are never served. Failures are never cached.
#[derive(Debug)]
pub struct ResultCache<V> {
    config: CacheConfig,
    entries: Mutex<LinkedHashMap<Fingerprint, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V> ResultCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(LinkedHashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the cached value for `fingerprint`, computing and storing it on a miss.
    ///
    /// A failed `compute` stores nothing and its error is returned unchanged.
    pub async fn get_or_compute<E, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint, "Cache hit");
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(fingerprint.clone(), value.clone(), ttl);
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint, ttl_ms = ttl.as_millis() as u64, "Cache miss stored");
        Ok(value)
    }

    /// Returns a live entry without touching hit/miss counters.
    #[must_use]
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<V> {
        let entries = self.entries.lock();
        entries
            .get(fingerprint)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Stores `value`, replacing any previous entry (last write wins).
    pub fn insert(&self, fingerprint: Fingerprint, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.lock();
        entries.insert(fingerprint, CacheEntry { value, expires_at });

        if let Some(max) = self.config.max_entries {
            while entries.len() > max {
                if let Some((evicted, _)) = entries.pop_front() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(fingerprint = %evicted, "Evicted least recently used entry");
                } else {
                    break;
                }
            }
        }
    }

    /// Removes one entry. Returns true if it existed.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().remove(fingerprint).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns the number of stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Spawns the background expiry sweep on the current tokio runtime.
    ///
    /// The task holds a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.sweep_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep_expired();
            }
        })
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(fingerprint) {
            None => return None,
            Some(entry) => entry.expires_at <= Instant::now(),
        };

        if expired {
            entries.remove(fingerprint);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entries.to_back(fingerprint).map(|entry| entry.value.clone())
    }
}
