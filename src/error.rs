//! Error types for the query cache.

use std::fmt;
use std::sync::Arc;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the query cache.
///
/// Only lifecycle errors ([`Error::Destroyed`], [`Error::Disconnected`]) and
/// errors coming from the query executor reach the caller of
/// [`QueryCache`](crate::QueryCache). Storage, codec and compression failures
/// are logged there and degrade to a cache miss or a skipped write.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a query result to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a query result.
    ///
    /// **Recovery:** the entry is treated as a miss and overwritten by the
    /// next successful execution.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// Expected during deployments that change the row types being cached.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Compressing or decompressing a stored value failed.
    CompressionError(String),

    /// Backend storage error (SQL, Redis, key-value store).
    ///
    /// Common causes:
    /// - Connection lost or pool closed
    /// - Malformed row in the cache table
    /// - Redis or key-value store unavailable
    BackendError(String),

    /// The query executor failed while running the query.
    ExecutionError(String),

    /// The query executor found no row for a `fetch_one` call.
    NotFound(String),

    /// Error produced by a caller-supplied constructor in
    /// [`QueryCache::fetch_one_or_else`](crate::QueryCache::fetch_one_or_else).
    Custom(Arc<dyn std::error::Error + Send + Sync>),

    /// Configuration error while building a backend.
    ConfigError(String),

    /// Operation on a relational cache after `destroy()`.
    Destroyed,

    /// Operation on a key-value cache after `disconnect()`.
    Disconnected,

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether this error comes from using a destroyed or disconnected cache.
    ///
    /// Lifecycle errors are the only cache errors surfaced to callers.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::Destroyed | Error::Disconnected)
    }

    /// Whether the executor reported that the query has no result.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Wrap any error type as [`Error::Custom`].
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Arc::new(err))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::CompressionError(msg) => write!(f, "Compression error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
            Error::NotFound(msg) => write!(f, "No result: {}", msg),
            Error::Custom(err) => write!(f, "{}", err),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Destroyed => write!(f, "Cache has been destroyed"),
            Error::Disconnected => write!(f, "Cache has been disconnected"),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Custom(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Configuration(msg) => Error::ConfigError(msg.to_string()),
            other => Error::BackendError(format!("SQL error: {}", other)),
        }
    }
}
