//! Key-value cache backend over a pluggable store.
//!
//! [`KvBackend`] is a pass-through adapter: the injected [`KvStore`] owns
//! expiry, and the adapter adds the default TTL, optional compression and
//! the disconnect lifecycle. With compression configured every stored value
//! carries a leading flag byte, `1` when the rest is compressed.
//! After [`KvBackend::disconnect`] every operation fails with
//! [`Error::Disconnected`](crate::Error::Disconnected) without touching the
//! store.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryKvStore;
#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisKvStore};

use super::CacheBackend;
use crate::codec::Compression;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::lifecycle::{Lifecycle, ShutdownKind};
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live passed to the store.
pub const DEFAULT_KV_TTL: Duration = Duration::from_millis(60_000);

const FLAG_RAW: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;

/// Trait for external key-value stores.
///
/// Implementations handle their own expiry: a value written with a TTL must
/// read back as `None` once it elapses.
#[allow(async_fn_in_trait)]
pub trait KvStore: Send + Sync {
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value`; `ttl = None` keeps it until deleted.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key, returning whether it existed.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key owned by this store.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn clear(&self) -> Result<()>;

    /// Iterate the live keys owned by this store.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable
    async fn keys(&self) -> Result<Vec<String>>;

    /// Release connections and other resources.
    ///
    /// # Errors
    /// Returns `Err` if releasing fails
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Configuration for [`KvBackend`].
#[derive(Clone, Debug)]
pub struct KvConfig {
    /// TTL passed with every write. `None` defers to the store.
    pub ttl: Option<Duration>,
    /// Compress values at or above the policy's threshold. Off by default.
    pub compression: Option<Compression>,
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            ttl: Some(DEFAULT_KV_TTL),
            compression: None,
        }
    }
}

impl KvConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` for a zero TTL
    pub fn validate(&self) -> Result<()> {
        match self.ttl {
            Some(ttl) if ttl.is_zero() => Err(Error::ConfigError(
                "key-value cache ttl must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

struct KvInner<S> {
    store: S,
    ttl: Option<Duration>,
    compression: Option<Compression>,
    lifecycle: Lifecycle,
}

fn pack(compression: &Compression, value: Vec<u8>) -> Result<Vec<u8>> {
    let (bytes, compressed) = compression.pack(value)?;
    let mut stored = Vec::with_capacity(bytes.len() + 1);
    stored.push(if compressed { FLAG_COMPRESSED } else { FLAG_RAW });
    stored.extend_from_slice(&bytes);
    Ok(stored)
}

fn unpack(compression: &Compression, stored: &[u8]) -> Result<Vec<u8>> {
    match stored.split_first() {
        Some((&FLAG_RAW, rest)) => Ok(rest.to_vec()),
        Some((&FLAG_COMPRESSED, rest)) => compression.unpack(rest.to_vec(), true),
        Some((flag, _)) => Err(Error::InvalidCacheEntry(format!(
            "unknown compression flag {}",
            flag
        ))),
        None => Err(Error::InvalidCacheEntry(
            "empty key-value entry".to_string(),
        )),
    }
}

/// Cache backend delegating to a [`KvStore`].
///
/// # Example
///
/// ```no_run
/// use query_cache::backend::{CacheBackend, KvBackend, KvConfig, MemoryKvStore};
/// use query_cache::CompiledQuery;
///
/// # async fn example() -> query_cache::Result<()> {
/// let backend = KvBackend::new(MemoryKvStore::new(), KvConfig::default())?;
/// let key = CompiledQuery::new("select 1").cache_key();
///
/// backend.set(&key, b"rows".to_vec()).await?;
/// backend.disconnect().await?;
/// assert!(backend.get(&key).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct KvBackend<S: KvStore> {
    inner: Arc<KvInner<S>>,
}

impl<S: KvStore> Clone for KvBackend<S> {
    fn clone(&self) -> Self {
        KvBackend {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KvStore> KvBackend<S> {
    /// Wrap `store`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid
    pub fn new(store: S, config: KvConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "✓ Key-value backend initialized (ttl: {:?}, compression: {})",
            config.ttl,
            config.compression.is_some()
        );
        Ok(KvBackend {
            inner: Arc::new(KvInner {
                store,
                ttl: config.ttl,
                compression: config.compression,
                lifecycle: Lifecycle::new(ShutdownKind::Disconnect),
            }),
        })
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn is_disconnected(&self) -> bool {
        !self.inner.lifecycle.is_active()
    }

    /// Remove one entry, returning whether it existed.
    ///
    /// # Errors
    /// Returns `Error::Disconnected` after disconnect, or the store's error
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.inner.lifecycle.ensure_active()?;
        let existed = self.inner.store.delete(key.as_str()).await?;
        debug!("✓ KV DELETE {} -> {}", key, existed);
        Ok(existed)
    }

    /// Clear all entries, mark the backend disconnected and release the
    /// store's resources.
    ///
    /// # Errors
    /// Returns `Error::Disconnected` if already disconnected. A store error
    /// while clearing or releasing is returned after the backend has been
    /// marked disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.begin_shutdown()?;

        let cleared = inner.store.clear().await;
        inner.lifecycle.finish_shutdown();
        let released = inner.store.disconnect().await;

        info!("✓ Key-value backend disconnected");
        cleared.and(released)
    }
}

impl<S: KvStore> CacheBackend for KvBackend<S> {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.inner.lifecycle.ensure_active()?;
        let stored = self.inner.store.get(key.as_str()).await?;
        let value = match (&self.inner.compression, stored) {
            (Some(compression), Some(stored)) => Some(unpack(compression, &stored)?),
            (_, stored) => stored,
        };

        if value.is_some() {
            debug!("✓ KV GET {} -> HIT", key);
        } else {
            debug!("✓ KV GET {} -> MISS", key);
        }
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<()> {
        self.inner.lifecycle.ensure_active()?;
        let value = match &self.inner.compression {
            Some(compression) => pack(compression, value)?,
            None => value,
        };
        self.inner
            .store
            .set(key.as_str(), value, self.inner.ttl)
            .await?;
        debug!("✓ KV SET {} (TTL: {:?})", key, self.inner.ttl);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lifecycle.ensure_active()?;
        self.inner.store.clear().await?;
        warn!("⚠ KV CLEAR executed - all cache cleared!");
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.inner.lifecycle.ensure_active()?;
        Ok(self.inner.store.keys().await?.len())
    }
}
