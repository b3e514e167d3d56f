//! # query-cache
//!
//! A read-through cache for SQL query results.
//!
//! ## Features
//!
//! - **Query-shaped:** Cache keys are derived from the compiled SQL text and its parameters
//! - **Backend Agnostic:** In-memory LRU, key-value stores (in-process or Redis) and relational tables (SQLite, PostgreSQL, MySQL)
//! - **Executor Agnostic:** Works with any engine that implements [`QueryExecutor`]
//! - **Best Effort:** Cache failures degrade to a miss; they never fail the query
//! - **Production Ready:** Built-in logging, metrics hooks, background expiry and eviction
//!
//! ## Quick Start
//!
//! ```ignore
//! use query_cache::{
//!     CacheableQuery, CompiledQuery, QueryCache, QueryExecutor, Result,
//!     backend::{SqlBackend, SqlConfig},
//! };
//! use serde::{Deserialize, Serialize};
//!
//! // 1. Describe the row
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Person {
//!     id: i64,
//!     first_name: String,
//! }
//!
//! // 2. Describe the query
//! struct PersonById(i64);
//!
//! impl CacheableQuery for PersonById {
//!     type Row = Person;
//!     fn compile(&self) -> CompiledQuery {
//!         CompiledQuery::new("select * from person where id = ?").bind(self.0)
//!     }
//! }
//!
//! // 3. Implement QueryExecutor over your database client
//! struct Db { /* pool */ }
//!
//! impl QueryExecutor<PersonById> for Db {
//!     async fn fetch_all(&self, query: &PersonById) -> Result<Vec<Person>> { todo!() }
//! }
//!
//! // 4. Create the cache - QueryCache is Clone for sharing across tasks
//! let backend = SqlBackend::connect("sqlite::memory:", SqlConfig::default()).await?;
//! let cache = QueryCache::new(backend);
//!
//! // 5. Use it
//! let person = cache.fetch_one(&PersonById(1), &db).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod codec;
pub mod error;
pub mod executor;
pub mod key;
pub mod lifecycle;
pub mod observability;
pub mod query;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use cache::QueryCache;
pub use error::{Error, Result};
pub use executor::{InMemoryExecutor, QueryExecutor};
pub use key::{CacheKey, CompiledQuery, QueryParam};
pub use query::{CacheableQuery, SqlQuery};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
