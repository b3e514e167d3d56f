//! Cache backend implementations.

use crate::error::Result;
use crate::key::CacheKey;

#[cfg(feature = "inmemory")]
pub mod inmemory;
pub mod kv;
#[cfg(feature = "sql")]
pub mod sql;

#[cfg(feature = "inmemory")]
pub use inmemory::{InMemoryBackend, MemoryConfig};
pub use kv::{KvBackend, KvConfig, KvStore, MemoryKvStore};
#[cfg(feature = "redis")]
pub use kv::{RedisConfig, RedisKvStore};
#[cfg(feature = "sql")]
pub use sql::{Dialect, SqlBackend, SqlConfig};

/// Trait for cache backend implementations.
///
/// Backends store opaque encoded results under a [`CacheKey`] and own their
/// expiry and capacity policy; the [`QueryCache`](crate::QueryCache) never
/// inspects raw storage.
///
/// **IMPORTANT:** All methods take `&self` to allow concurrent access.
/// Implementations use interior mutability or external storage, and clones
/// share the same underlying store.
///
/// **ASYNC:** All methods are async and must be awaited.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Retrieve a live value by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found and not expired
    /// - `Ok(None)` - Cache miss (absent or expired)
    ///
    /// # Errors
    /// Returns `Err` on storage failure or after shutdown
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value; its expiry restarts from now.
    ///
    /// # Errors
    /// Returns `Err` on storage failure or after shutdown
    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<()>;

    /// Remove every entry. The backend stays usable.
    ///
    /// # Errors
    /// Returns `Err` on storage failure or after shutdown
    async fn clear(&self) -> Result<()>;

    /// Number of stored entries, including expired ones not yet swept.
    ///
    /// # Errors
    /// Returns `Err` on storage failure or after shutdown
    async fn len(&self) -> Result<usize>;

    /// Whether the backend holds no entries.
    ///
    /// # Errors
    /// Returns `Err` on storage failure or after shutdown
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::key::CompiledQuery;

    #[tokio::test]
    async fn test_backend_is_empty_default() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().await.expect("Failed to check empty"));

        let key = CompiledQuery::new("select 1").cache_key();
        backend
            .set(&key, vec![1, 2, 3])
            .await
            .expect("Failed to set key");
        assert!(!backend.is_empty().await.expect("Failed to check empty"));
    }
}
