//! Query executor trait for abstracting the engine that actually runs queries.
//!
//! The `QueryExecutor` trait decouples the cache from any particular SQL
//! client. Implement it over SQLx, tokio-postgres, Diesel or a query builder;
//! the cache only calls it on a miss.
//!
//! # Mocking for Tests
//!
//! [`InMemoryExecutor`] maps compiled queries to canned rows and counts how
//! many times it was asked to run something, which is what cache tests need
//! to tell a hit from a miss.

use crate::error::{Error, Result};
use crate::key::{CacheKey, CompiledQuery};
use crate::query::CacheableQuery;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trait for query execution engines.
///
/// # Returns
/// - `fetch_all`: every row, possibly none
/// - `fetch_optional`: the first row, `None` when there is none
/// - `fetch_one`: the first row, or [`Error::NotFound`] when there is none
#[allow(async_fn_in_trait)]
pub trait QueryExecutor<Q: CacheableQuery>: Send + Sync {
    /// Run the query and return all rows.
    ///
    /// # Errors
    /// Returns `Err` if the query fails to execute
    async fn fetch_all(&self, query: &Q) -> Result<Vec<Q::Row>>;

    /// Run the query and return its first row.
    ///
    /// Default implementation takes the first row of `fetch_all()`.
    ///
    /// # Errors
    /// Returns `Err` if the query fails to execute
    async fn fetch_optional(&self, query: &Q) -> Result<Option<Q::Row>> {
        Ok(self.fetch_all(query).await?.into_iter().next())
    }

    /// Run the query and return its first row or fail.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when the query produced no row
    async fn fetch_one(&self, query: &Q) -> Result<Q::Row> {
        self.fetch_optional(query)
            .await?
            .ok_or_else(|| Error::NotFound(query.compile().sql))
    }
}

// ============================================================================
// In-Memory Test Executor
// ============================================================================

/// Simple in-memory executor for testing cache behaviour.
///
/// Rows are registered per compiled query. Unknown queries return no rows.
pub struct InMemoryExecutor<R> {
    results: HashMap<CacheKey, Vec<R>>,
    failure: Option<Error>,
    executions: AtomicUsize,
}

impl<R: Clone + Send + Sync> InMemoryExecutor<R> {
    pub fn new() -> Self {
        InMemoryExecutor {
            results: HashMap::new(),
            failure: None,
            executions: AtomicUsize::new(0),
        }
    }

    /// Register the rows a compiled query returns.
    pub fn insert(&mut self, query: &CompiledQuery, rows: Vec<R>) {
        self.results.insert(query.cache_key(), rows);
    }

    /// Make every subsequent execution fail with `error`.
    pub fn fail_with(&mut self, error: Error) {
        self.failure = Some(error);
    }

    /// Number of queries run so far.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Remove all registered results.
    pub fn clear(&mut self) {
        self.results.clear();
    }
}

impl<R: Clone + Send + Sync> Default for InMemoryExecutor<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: CacheableQuery> QueryExecutor<Q> for InMemoryExecutor<Q::Row> {
    async fn fetch_all(&self, query: &Q) -> Result<Vec<Q::Row>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(self
            .results
            .get(&query.cache_key())
            .cloned()
            .unwrap_or_default())
    }
}
