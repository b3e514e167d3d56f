//! Queries that can be cached.

use crate::key::{CacheKey, CompiledQuery};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// A query whose results may be served from cache.
///
/// `compile()` must be deterministic and side-effect free: the cache key is
/// derived from its output on every call.
///
/// # Example
///
/// ```
/// use query_cache::{CacheableQuery, CompiledQuery};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// pub struct Person {
///     pub id: i64,
///     pub first_name: String,
/// }
///
/// pub struct PersonById(pub i64);
///
/// impl CacheableQuery for PersonById {
///     type Row = Person;
///
///     fn compile(&self) -> CompiledQuery {
///         CompiledQuery::new("select * from person where id = ?").bind(self.0)
///     }
/// }
/// ```
pub trait CacheableQuery: Send + Sync {
    /// Row type produced by the query.
    type Row: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Canonical SQL text and positional parameters.
    fn compile(&self) -> CompiledQuery;

    /// Cache key for this query.
    fn cache_key(&self) -> CacheKey {
        self.compile().cache_key()
    }
}

/// A raw compiled query typed by its row.
///
/// Useful when queries are built as text rather than through a builder.
pub struct SqlQuery<R> {
    compiled: CompiledQuery,
    _row: PhantomData<fn() -> R>,
}

impl<R> SqlQuery<R> {
    pub fn new(compiled: CompiledQuery) -> Self {
        SqlQuery {
            compiled,
            _row: PhantomData,
        }
    }

    pub fn compiled(&self) -> &CompiledQuery {
        &self.compiled
    }
}

impl<R> Clone for SqlQuery<R> {
    fn clone(&self) -> Self {
        SqlQuery::new(self.compiled.clone())
    }
}

impl<R> CacheableQuery for SqlQuery<R>
where
    R: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    type Row = R;

    fn compile(&self) -> CompiledQuery {
        self.compiled.clone()
    }
}
