//! Relational cache backend.
//!
//! Entries live in one table (see [`dialect`] for the layout) reached through
//! a `sqlx` [`AnyPool`], so the same backend runs against SQLite, PostgreSQL
//! and MySQL. Reads bump `last_access` in the same statement that checks
//! expiry. Expired rows and rows beyond `max` are removed by a background
//! sweep that runs on an interval and, debounced, after writes.
//!
//! # Example
//!
//! ```no_run
//! use query_cache::backend::{CacheBackend, SqlBackend, SqlConfig};
//! use query_cache::CompiledQuery;
//!
//! # async fn example() -> query_cache::Result<()> {
//! let backend = SqlBackend::connect("sqlite::memory:", SqlConfig::default().with_max(100)).await?;
//! let key = CompiledQuery::new("select * from person").cache_key();
//!
//! backend.set(&key, b"rows".to_vec()).await?;
//! assert!(backend.get(&key).await?.is_some());
//!
//! backend.destroy().await?;
//! # Ok(())
//! # }
//! ```

mod clock;
pub mod dialect;
mod sweeper;

pub use dialect::{Dialect, Statements};
pub use sweeper::SweepStats;

use super::CacheBackend;
use crate::codec::{Compression, Compressor, GzipCompressor, DEFAULT_COMPRESSION_THRESHOLD};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::lifecycle::{Lifecycle, ShutdownKind};
use clock::AccessClock;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Arc;
use std::time::Duration;
use sweeper::{SweepPlan, Sweeper};

const DEFAULT_MAX: u64 = 50;
const DEFAULT_TTL: Duration = Duration::from_millis(60_000);
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1_000);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(60_000);
const DEFAULT_TABLE: &str = "cache";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Schema creation is retried this many times to ride out a concurrent
/// bootstrap of the same table.
const BOOTSTRAP_ATTEMPTS: u32 = 3;

/// Configuration for [`SqlBackend`].
///
/// Defaults can be overridden from the environment with
/// [`SqlConfig::from_env`].
#[derive(Clone, Debug)]
pub struct SqlConfig {
    /// Rows kept by the eviction sweep. `0` disables eviction.
    pub max: u64,
    pub ttl: Duration,
    /// Inferred from the connection URL when `None`.
    pub dialect: Option<Dialect>,
    /// Minimum spacing between write-triggered sweeps. Zero disables them.
    pub debounce_time: Duration,
    /// Period of the background sweep. Zero disables it.
    pub sweep_interval: Duration,
    pub compression: bool,
    /// Encoded values at least this long are compressed.
    pub compression_threshold: usize,
    /// Applied when `compression` is on. Gzip by default.
    pub compressor: Arc<dyn Compressor>,
    pub table_name: String,
    /// Pool size used by [`SqlBackend::connect`].
    pub max_connections: u32,
}

impl Default for SqlConfig {
    fn default() -> Self {
        SqlConfig {
            max: DEFAULT_MAX,
            ttl: DEFAULT_TTL,
            dialect: None,
            debounce_time: DEFAULT_DEBOUNCE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            compression: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compressor: Arc::new(GzipCompressor::default()),
            table_name: DEFAULT_TABLE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl SqlConfig {
    /// Defaults overridden by `QUERY_CACHE_MAX`, `QUERY_CACHE_TTL_MS`,
    /// `QUERY_CACHE_DEBOUNCE_MS`, `QUERY_CACHE_SWEEP_INTERVAL_MS` and
    /// `QUERY_CACHE_COMPRESSION`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = SqlConfig::default();
        SqlConfig {
            max: env_parse("QUERY_CACHE_MAX").unwrap_or(defaults.max),
            ttl: env_parse("QUERY_CACHE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ttl),
            debounce_time: env_parse("QUERY_CACHE_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce_time),
            sweep_interval: env_parse("QUERY_CACHE_SWEEP_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            compression: env_parse("QUERY_CACHE_COMPRESSION").unwrap_or(defaults.compression),
            ..defaults
        }
    }

    pub fn with_max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_debounce_time(mut self, debounce: Duration) -> Self {
        self.debounce_time = debounce;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` for a zero TTL, an empty pool or a table
    /// name that is not a plain identifier
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::ConfigError(
                "sql cache ttl must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::ConfigError(
                "sql cache max_connections must be at least 1".to_string(),
            ));
        }
        let valid_table = !self.table_name.is_empty()
            && self
                .table_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_table {
            return Err(Error::ConfigError(format!(
                "invalid cache table name '{}'",
                self.table_name
            )));
        }
        Ok(())
    }
}

struct SqlInner {
    pool: AnyPool,
    dialect: Dialect,
    statements: Arc<Statements>,
    ttl_ms: i64,
    compress_writes: bool,
    compression: Compression,
    clock: Arc<AccessClock>,
    sweeper: Sweeper,
    lifecycle: Lifecycle,
}

/// Cache backend storing entries in a relational table.
///
/// Clones share the pool, the sweeper and the lifecycle. The sweeper stops
/// when the last clone is dropped or on [`SqlBackend::destroy`].
#[derive(Clone)]
pub struct SqlBackend {
    inner: Arc<SqlInner>,
}

impl SqlBackend {
    /// Open a pool for `url`, bootstrap the table and clear it.
    ///
    /// An in-memory SQLite database exists per connection, so for such URLs
    /// the pool is pinned to a single connection that is never recycled.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` for invalid configuration or an unknown
    /// URL scheme, `Error::BackendError` if connecting or bootstrapping fails
    pub async fn connect(url: &str, config: SqlConfig) -> Result<Self> {
        config.validate()?;
        sqlx::any::install_default_drivers();

        let dialect = match config.dialect {
            Some(dialect) => dialect,
            None => Dialect::from_url(url)?,
        };
        let in_memory =
            dialect == Dialect::Sqlite && (url.contains(":memory:") || url.contains("mode=memory"));

        let options = if in_memory {
            AnyPoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(config.max_connections)
        };
        let pool = options.connect(url).await?;

        Self::new(pool, config.with_dialect(dialect)).await
    }

    /// Build a backend over an existing pool. The dialect must be set in
    /// `config`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the dialect is missing or the
    /// configuration is invalid, `Error::BackendError` if bootstrapping fails
    pub async fn new(pool: AnyPool, config: SqlConfig) -> Result<Self> {
        config.validate()?;
        let dialect = config.dialect.ok_or_else(|| {
            Error::ConfigError("a dialect is required when supplying a pool".to_string())
        })?;

        let statements = Arc::new(dialect.statements(&config.table_name));
        bootstrap(&pool, &statements, &config.table_name).await?;

        sqlx::query(&statements.clear).execute(&pool).await?;

        let clock = Arc::new(AccessClock::new());
        let plan = SweepPlan {
            pool: pool.clone(),
            statements: Arc::clone(&statements),
            max: config.max,
            clock: Arc::clone(&clock),
        };
        let sweeper = Sweeper::spawn(plan, config.sweep_interval, config.debounce_time);

        info!(
            "✓ SQL backend initialized ({}, table: {}, max: {}, ttl: {:?})",
            dialect.name(),
            config.table_name,
            config.max,
            config.ttl
        );

        Ok(SqlBackend {
            inner: Arc::new(SqlInner {
                pool,
                dialect,
                statements,
                ttl_ms: i64::try_from(config.ttl.as_millis()).unwrap_or(i64::MAX),
                compress_writes: config.compression,
                compression: Compression::new(config.compressor, config.compression_threshold),
                clock,
                sweeper,
                lifecycle: Lifecycle::new(ShutdownKind::Destroy),
            }),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    /// Underlying pool, for inspecting the cache table directly.
    pub fn pool(&self) -> &AnyPool {
        &self.inner.pool
    }

    pub fn is_destroyed(&self) -> bool {
        !self.inner.lifecycle.is_active()
    }

    /// Run one expiry and eviction pass now.
    ///
    /// The pass runs on the sweep task, after any sweep already in
    /// progress.
    ///
    /// # Errors
    /// Returns `Error::Destroyed` after destroy, or the database error
    pub async fn sweep(&self) -> Result<SweepStats> {
        self.inner.lifecycle.ensure_active()?;
        let stats = self.inner.sweeper.sweep_now().await?;
        debug!(
            "✓ SQL SWEEP -> {} expired, {} evicted",
            stats.expired, stats.evicted
        );
        Ok(stats)
    }

    /// Clear the table, stop the sweeper and close the pool.
    ///
    /// Every later operation fails with `Error::Destroyed`.
    ///
    /// # Errors
    /// Returns `Error::Destroyed` if already destroyed. A database error
    /// while clearing is returned after teardown has completed.
    pub async fn destroy(&self) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.begin_shutdown()?;

        inner.sweeper.shutdown().await;
        let cleared = sqlx::query(&inner.statements.clear)
            .execute(&inner.pool)
            .await;
        inner.pool.close().await;
        inner.lifecycle.finish_shutdown();

        info!("✓ SQL backend destroyed");
        cleared.map(|_| ()).map_err(Error::from)
    }

    async fn fetch_live(&self, key: &CacheKey, now: i64) -> Result<Option<AnyRow>> {
        let inner = &self.inner;
        let statements = &inner.statements;

        if let Some(touch_returning) = &statements.touch_returning {
            let row = sqlx::query(touch_returning)
                .bind(now)
                .bind(key.as_str())
                .bind(now)
                .fetch_optional(&inner.pool)
                .await?;
            return Ok(row);
        }

        let mut tx = inner.pool.begin().await?;
        sqlx::query(&statements.touch)
            .bind(now)
            .bind(key.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query(&statements.select_live)
            .bind(key.as_str())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row)
    }
}

async fn bootstrap(pool: &AnyPool, statements: &Statements, table: &str) -> Result<()> {
    let mut attempt = 1;
    loop {
        match ensure_schema(pool, statements, table).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < BOOTSTRAP_ATTEMPTS => {
                warn!(
                    "⚠ SQL cache bootstrap attempt {} failed, retrying: {}",
                    attempt, e
                );
                tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn ensure_schema(pool: &AnyPool, statements: &Statements, table: &str) -> Result<()> {
    sqlx::query(&statements.create_table).execute(pool).await?;

    for index in &statements.indexes {
        if let Some(exists) = &statements.index_exists {
            let count: i64 = sqlx::query_scalar(exists)
                .bind(table)
                .bind(index.name.as_str())
                .fetch_one(pool)
                .await?;
            if count > 0 {
                continue;
            }
        }
        sqlx::query(&index.create).execute(pool).await?;
    }
    Ok(())
}

impl CacheBackend for SqlBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.inner.lifecycle.ensure_active()?;
        let now = self.inner.clock.tick();

        let Some(row) = self.fetch_live(key, now).await? else {
            debug!("✓ SQL GET {} -> MISS", key);
            return Ok(None);
        };

        let value: Vec<u8> = row.try_get(0)?;
        let compressed: i64 = row.try_get(1)?;
        let value = self.inner.compression.unpack(value, compressed != 0)?;

        debug!("✓ SQL GET {} -> HIT", key);
        Ok(Some(value))
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>) -> Result<()> {
        let inner = &self.inner;
        inner.lifecycle.ensure_active()?;

        let (bytes, compressed) = if inner.compress_writes {
            inner.compression.pack(value)?
        } else {
            (value, false)
        };

        let now = inner.clock.tick();
        let expires = now.saturating_add(inner.ttl_ms);
        sqlx::query(&inner.statements.upsert)
            .bind(key.as_str())
            .bind(bytes)
            .bind(expires)
            .bind(now)
            .bind(i64::from(compressed))
            .execute(&inner.pool)
            .await?;

        inner.sweeper.schedule();
        debug!("✓ SQL SET {} (compressed: {})", key, compressed);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lifecycle.ensure_active()?;
        sqlx::query(&self.inner.statements.clear)
            .execute(&self.inner.pool)
            .await?;
        warn!("⚠ SQL CLEAR executed - all cache cleared!");
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        self.inner.lifecycle.ensure_active()?;
        let count: i64 = sqlx::query_scalar(&self.inner.statements.count)
            .fetch_one(&self.inner.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
