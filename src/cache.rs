//! Read-through query cache - main entry point.
//!
//! [`QueryCache`] derives a key from the compiled query, serves a decodable
//! backend value if there is one, and otherwise runs the executor, stores
//! the encoded outcome and returns the live result.
//!
//! The cache is best-effort. Backend and codec failures are logged and
//! treated as a miss or a skipped write. Only lifecycle errors
//! ([`Error::Destroyed`], [`Error::Disconnected`]) and executor errors reach
//! the caller.

use crate::backend::CacheBackend;
use crate::codec;
use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::key::{CacheKey, CompiledQuery};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::query::CacheableQuery;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Read-through cache over a [`CacheBackend`].
///
/// Clones share the backend and the metrics sink.
///
/// # Example
///
/// ```ignore
/// use query_cache::{QueryCache, backend::InMemoryBackend};
///
/// let cache = QueryCache::new(InMemoryBackend::new());
///
/// // Runs the query on the first call, serves the cached rows afterwards.
/// let people = cache.fetch_all(&PeopleByCity("Oslo"), &executor).await?;
/// ```
pub struct QueryCache<B: CacheBackend> {
    backend: B,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B: CacheBackend> Clone for QueryCache<B> {
    fn clone(&self) -> Self {
        QueryCache {
            backend: self.backend.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B: CacheBackend> QueryCache<B> {
    pub fn new(backend: B) -> Self {
        QueryCache {
            backend,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get backend reference (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Remove every cached result.
    ///
    /// # Errors
    /// Returns the backend's error, including lifecycle errors
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// All rows of `query`.
    ///
    /// # Errors
    /// Returns the executor's error on a miss, or a lifecycle error from the
    /// backend
    pub async fn fetch_all<Q, E>(&self, query: &Q, executor: &E) -> Result<Vec<Q::Row>>
    where
        Q: CacheableQuery,
        E: QueryExecutor<Q>,
    {
        self.read_through(query, || executor.fetch_all(query)).await
    }

    /// First row of `query`, if any. An empty result is cached too.
    ///
    /// # Errors
    /// Returns the executor's error on a miss, or a lifecycle error from the
    /// backend
    pub async fn fetch_optional<Q, E>(&self, query: &Q, executor: &E) -> Result<Option<Q::Row>>
    where
        Q: CacheableQuery,
        E: QueryExecutor<Q>,
    {
        self.read_through(query, || executor.fetch_optional(query))
            .await
    }

    /// First row of `query`, failing when there is none.
    ///
    /// A not-found outcome is never cached.
    ///
    /// # Errors
    /// Returns the executor's `Error::NotFound` unchanged when the query has
    /// no result, any other executor error on a miss, or a lifecycle error
    pub async fn fetch_one<Q, E>(&self, query: &Q, executor: &E) -> Result<Q::Row>
    where
        Q: CacheableQuery,
        E: QueryExecutor<Q>,
    {
        self.read_through(query, || executor.fetch_one(query)).await
    }

    /// Like [`QueryCache::fetch_one`], with a not-found outcome replaced by
    /// the error `or_else` builds from the compiled query.
    ///
    /// # Errors
    /// Returns the error built by `or_else` when the query has no result,
    /// otherwise as [`QueryCache::fetch_one`]
    pub async fn fetch_one_or_else<Q, E, F>(
        &self,
        query: &Q,
        executor: &E,
        or_else: F,
    ) -> Result<Q::Row>
    where
        Q: CacheableQuery,
        E: QueryExecutor<Q>,
        F: FnOnce(&CompiledQuery) -> Error,
    {
        match self.fetch_one(query, executor).await {
            Err(e) if e.is_not_found() => Err(or_else(&query.compile())),
            other => other,
        }
    }

    async fn read_through<Q, T, F, Fut>(&self, query: &Q, execute: F) -> Result<T>
    where
        Q: CacheableQuery,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timer = Instant::now();
        let key = query.cache_key();

        if let Some(hit) = self.lookup::<T>(&key).await? {
            debug!("✓ Cache hit for {}", key);
            self.metrics.record_hit(key.as_str(), timer.elapsed());
            return Ok(hit);
        }

        debug!("Cache miss for {}, executing query", key);
        let value = execute().await?;
        self.metrics.record_miss(key.as_str(), timer.elapsed());

        self.store(&key, &value).await?;
        Ok(value)
    }

    /// Backend read, degraded to `None` on anything but a lifecycle error.
    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) if e.is_lifecycle() => return Err(e),
            Err(e) => {
                warn!("⚠ Cache read failed for {}, treating as miss: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
                return Ok(None);
            }
        };

        match codec::decode::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("⚠ Undecodable cache entry for {}, treating as miss: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
                Ok(None)
            }
        }
    }

    /// Encode and write, skipping the write on anything but a lifecycle error.
    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let timer = Instant::now();
        let bytes = match codec::encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("✗ Failed to encode result for {}: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
                return Ok(());
            }
        };

        match self.backend.set(key, bytes).await {
            Ok(()) => {
                self.metrics.record_set(key.as_str(), timer.elapsed());
                Ok(())
            }
            Err(e) if e.is_lifecycle() => Err(e),
            Err(e) => {
                warn!("⚠ Cache write failed for {}, skipped: {}", key, e);
                self.metrics.record_error(key.as_str(), &e.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::executor::InMemoryExecutor;
    use crate::query::SqlQuery;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: i64,
        first_name: String,
    }

    fn person(id: i64, name: &str) -> Person {
        Person {
            id,
            first_name: name.to_string(),
        }
    }

    fn by_id(id: i64) -> SqlQuery<Person> {
        SqlQuery::new(CompiledQuery::new("select * from person where id = ?").bind(id))
    }

    fn executor() -> InMemoryExecutor<Person> {
        let mut executor = InMemoryExecutor::new();
        executor.insert(by_id(1).compiled(), vec![person(1, "Max")]);
        executor
    }

    /// Backend whose every call fails with an I/O-style error.
    #[derive(Clone, Default)]
    struct BrokenBackend {
        calls: Arc<AtomicUsize>,
    }

    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn set(&self, _key: &CacheKey, _value: Vec<u8>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::BackendError("connection refused".to_string()))
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }

        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Counting {
        hits: AtomicUsize,
        misses: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CacheMetrics for Counting {
        fn record_hit(&self, _key: &str, _duration: Duration) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }

        fn record_miss(&self, _key: &str, _duration: Duration) {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }

        fn record_error(&self, _key: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let executor = executor();

        let first = cache
            .fetch_all(&by_id(1), &executor)
            .await
            .expect("Failed to fetch");
        let second = cache
            .fetch_all(&by_id(1), &executor)
            .await
            .expect("Failed to fetch");

        assert_eq!(first, vec![person(1, "Max")]);
        assert_eq!(first, second);
        assert_eq!(executor.executions(), 1);
        assert_eq!(cache.backend().len().await.expect("Failed to count"), 1);
    }

    #[tokio::test]
    async fn test_fetch_optional_caches_empty_result() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let executor = executor();

        for _ in 0..2 {
            let row = cache
                .fetch_optional(&by_id(2), &executor)
                .await
                .expect("Failed to fetch");
            assert_eq!(row, None);
        }
        assert_eq!(executor.executions(), 1);
    }

    #[tokio::test]
    async fn test_fetch_one_not_found_is_not_cached() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let executor = executor();

        for _ in 0..2 {
            let err = cache
                .fetch_one(&by_id(2), &executor)
                .await
                .expect_err("Expected not found");
            assert!(matches!(err, Error::NotFound(ref sql) if sql.contains("person")));
        }
        assert_eq!(executor.executions(), 2);
        assert_eq!(cache.backend().len().await.expect("Failed to count"), 0);
    }

    #[tokio::test]
    async fn test_fetch_one_or_else_maps_not_found() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let executor = executor();

        let err = cache
            .fetch_one_or_else(&by_id(2), &executor, |q| {
                Error::Other(format!("no person for {:?}", q.parameters))
            })
            .await
            .expect_err("Expected custom error");
        assert!(matches!(err, Error::Other(ref msg) if msg.contains("Int(2)")));

        let found = cache
            .fetch_one_or_else(&by_id(1), &executor, |_| Error::Other("unused".into()))
            .await
            .expect("Failed to fetch");
        assert_eq!(found, person(1, "Max"));
    }

    #[tokio::test]
    async fn test_executor_error_propagates() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let mut executor = executor();
        executor.fail_with(Error::ExecutionError("syntax error".to_string()));

        let result = cache.fetch_all(&by_id(1), &executor).await;
        assert!(matches!(result, Err(Error::ExecutionError(_))));
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_miss() {
        let backend = BrokenBackend::default();
        let metrics = Arc::new(Counting::default());
        let cache = QueryCache::new(backend.clone()).with_metrics(metrics.clone());
        let executor = executor();

        for _ in 0..2 {
            let rows = cache
                .fetch_all(&by_id(1), &executor)
                .await
                .expect("Backend failure must not fail the request");
            assert_eq!(rows, vec![person(1, "Max")]);
        }

        assert_eq!(executor.executions(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.misses.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.errors.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let backend = InMemoryBackend::new();
        let cache = QueryCache::new(backend.clone());
        let executor = executor();

        backend
            .set(&by_id(1).cache_key(), b"garbage".to_vec())
            .await
            .expect("Failed to seed");

        let rows = cache
            .fetch_all(&by_id(1), &executor)
            .await
            .expect("Failed to fetch");
        assert_eq!(rows, vec![person(1, "Max")]);
        assert_eq!(executor.executions(), 1);

        // The bad entry was replaced by a decodable one.
        cache
            .fetch_all(&by_id(1), &executor)
            .await
            .expect("Failed to fetch");
        assert_eq!(executor.executions(), 1);
    }

    #[tokio::test]
    async fn test_metrics_hit_and_miss() {
        let metrics = Arc::new(Counting::default());
        let cache = QueryCache::new(InMemoryBackend::new()).with_metrics(metrics.clone());
        let executor = executor();

        cache.fetch_one(&by_id(1), &executor).await.expect("Failed to fetch");
        cache.fetch_one(&by_id(1), &executor).await.expect("Failed to fetch");

        assert_eq!(metrics.misses.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clones_share_backend() {
        let cache = QueryCache::new(InMemoryBackend::new());
        let other = cache.clone();
        let executor = executor();

        cache.fetch_all(&by_id(1), &executor).await.expect("Failed to fetch");
        other.fetch_all(&by_id(1), &executor).await.expect("Failed to fetch");
        assert_eq!(executor.executions(), 1);

        other.clear().await.expect("Failed to clear");
        assert!(cache.backend().is_empty().await.expect("Failed to check"));
    }
}
