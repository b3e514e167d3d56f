//! In-process key-value store.
//!
//! Uses DashMap for concurrent access with per-key sharding. Expiry is
//! checked on access; expired entries are removed when touched.

use super::KvStore;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        StoredValue {
            data,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Unbounded key-value store living in this process.
///
/// The default store for [`KvBackend`](super::KvBackend) and a stand-in for
/// remote stores in tests. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    map: Arc<DashMap<String, StoredValue>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.map.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.clone()));
            }
        }

        self.map.remove_if(key, |_, v| v.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.map.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .map
            .remove(key)
            .is_some_and(|(_, value)| !value.is_expired()))
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.map.retain(|_, v| !v.is_expired());
        Ok(self.map.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.map.clear();
        self.map.shrink_to_fit();
        Ok(())
    }
}
