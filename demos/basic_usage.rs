//! Basic usage of query-cache.
//!
//! A read-through cache in front of a fake "person" table, backed by the
//! relational backend over in-memory SQLite.
//!
//! Run with: RUST_LOG=debug cargo run --example basic_usage

use query_cache::backend::{CacheBackend, SqlBackend, SqlConfig};
use query_cache::{CacheableQuery, CompiledQuery, Error, QueryCache, QueryExecutor};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Person {
    id: i64,
    first_name: String,
    last_name: String,
}

struct PersonById(i64);

impl CacheableQuery for PersonById {
    type Row = Person;

    fn compile(&self) -> CompiledQuery {
        CompiledQuery::new("select id, first_name, last_name from person where id = ?")
            .bind(self.0)
    }
}

/// Stand-in for a real database client.
#[derive(Default)]
struct PersonTable {
    queries: AtomicUsize,
}

impl QueryExecutor<PersonById> for PersonTable {
    async fn fetch_all(&self, query: &PersonById) -> query_cache::Result<Vec<Person>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        Ok(match query.0 {
            1 => vec![Person {
                id: 1,
                first_name: "Jennifer".to_string(),
                last_name: "Aniston".to_string(),
            }],
            2 => vec![Person {
                id: 2,
                first_name: "Arnold".to_string(),
                last_name: "Schwarzenegger".to_string(),
            }],
            _ => vec![],
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let backend = SqlBackend::connect(
        "sqlite::memory:",
        SqlConfig::default()
            .with_max(100)
            .with_ttl(Duration::from_secs(30))
            .with_compression(true),
    )
    .await?;
    let cache = QueryCache::new(backend.clone());
    let table = PersonTable::default();

    let first = cache.fetch_one(&PersonById(1), &table).await?;
    println!("First call:  {:?}", first);

    let second = cache.fetch_one(&PersonById(1), &table).await?;
    println!("Second call: {:?}", second);

    let missing = cache
        .fetch_one_or_else(&PersonById(99), &table, |q| {
            Error::Other(format!("no person matches {:?}", q.parameters))
        })
        .await;
    println!("Missing:     {:?}", missing.err());

    println!(
        "Database queries: {}, cached entries: {}",
        table.queries.load(Ordering::SeqCst),
        backend.len().await?
    );

    backend.destroy().await?;
    Ok(())
}
