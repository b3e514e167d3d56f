//! In-memory cache backend (default, thread-safe, bounded).
//!
//! A least-recently-used map with a fixed capacity and a per-backend TTL.
//! Reads refresh recency; writes renew expiry. Expired entries are dropped
//! when they are next looked up.

use super::CacheBackend;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default time-to-live for entries.
pub const DEFAULT_TTL: Duration = Duration::from_millis(60_000);

/// Configuration for [`InMemoryBackend`].
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Maximum number of entries kept; must be at least 1.
    pub max: usize,
    /// Time-to-live applied on every write; must be non-zero.
    pub ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            max: DEFAULT_MAX_ENTRIES,
            ttl: DEFAULT_TTL,
        }
    }
}

impl MemoryConfig {
    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` for a zero capacity or zero TTL
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::ConfigError(
                "in-memory cache max must be at least 1".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(Error::ConfigError(
                "in-memory cache ttl must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        CacheEntry {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe bounded in-memory cache backend.
///
/// # Example
///
/// ```no_run
/// use query_cache::backend::{CacheBackend, InMemoryBackend, MemoryConfig};
/// use query_cache::CompiledQuery;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::with_config(
///         MemoryConfig::default()
///             .with_max(100)
///             .with_ttl(Duration::from_secs(30)),
///     )?;
///
///     let key = CompiledQuery::new("select * from person").cache_key();
///     backend.set(&key, b"rows".to_vec()).await?;
///     assert!(backend.get(&key).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<LruCache<CacheKey, CacheEntry>>>,
    ttl: Duration,
}

impl InMemoryBackend {
    /// Create a backend with the default capacity and TTL.
    pub fn new() -> Self {
        let max = NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self::build(max, DEFAULT_TTL)
    }

    /// Create a backend from configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid
    pub fn with_config(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        let max = NonZeroUsize::new(config.max)
            .ok_or_else(|| Error::ConfigError("max must be at least 1".to_string()))?;
        Ok(Self::build(max, config.ttl))
    }

    fn build(max: NonZeroUsize, ttl: Duration) -> Self {
        debug!(
            "✓ InMemory backend initialized (max: {}, ttl: {:?})",
            max, ttl
        );
        InMemoryBackend {
            store: Arc::new(Mutex::new(LruCache::new(max))),
            ttl,
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.store.lock().cap().get()
    }

    /// Memory statistics.
    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        let total_bytes: usize = store.iter().map(|(_, entry)| entry.data.len()).sum();
        let expired_entries = store.iter().filter(|(_, entry)| entry.is_expired()).count();

        CacheStats {
            total_entries: store.len(),
            expired_entries,
            total_bytes,
        }
    }

    /// Print cache statistics to debug log.
    pub fn log_stats(&self) {
        let stats = self.stats();
        debug!(
            "Cache Stats: {} entries ({} expired), {} bytes",
            stats.total_entries, stats.expired_entries, stats.total_bytes
        );
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock();

        let expired = match store.get(key) {
            Some(entry) if !entry.is_expired() => {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            store.pop(key);
            debug!("✓ InMemory GET {} -> EXPIRED", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<()> {
        let entry = CacheEntry::new(value, self.ttl);
        let evicted = self.store.lock().push(key.clone(), entry);

        match evicted {
            Some((old_key, _)) if &old_key != key => {
                debug!("✓ InMemory SET {} (evicted {})", key, old_key);
            }
            _ => debug!("✓ InMemory SET {} (TTL: {:?})", key, self.ttl),
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.lock().clear();
        warn!("⚠ InMemory CLEAR executed - all cache cleared!");
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.store.lock().len())
    }
}

/// Cache statistics.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_bytes: usize,
}
