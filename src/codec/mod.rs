//! Postcard-based result encoding with versioned envelopes.
//!
//! Every cached query result is stored in this format:
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (varint) │POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "QRYC"              u32                postcard::to_allocvec(T)
//! ```
//!
//! Encoding is deterministic: the same rows always produce identical bytes.
//! Entries with a foreign magic or another schema version are rejected, which
//! the cache treats as a miss.
//!
//! Byte-level compression of encoded values lives in [`compression`].
//!
//! # Example
//!
//! ```rust
//! use query_cache::codec::{decode, encode};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Person {
//!     id: i64,
//!     first_name: String,
//! }
//!
//! # fn main() -> query_cache::Result<()> {
//! let rows = vec![Person { id: 1, first_name: "Max".to_string() }];
//! let bytes = encode(&rows)?;
//! let decoded: Vec<Person> = decode(&bytes)?;
//! assert_eq!(rows, decoded);
//! # Ok(())
//! # }
//! ```

pub mod compression;

pub use compression::{Compression, Compressor, GzipCompressor, DEFAULT_COMPRESSION_THRESHOLD};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for cached query results.
pub const CACHE_MAGIC: [u8; 4] = *b"QRYC";

/// Current schema version.
///
/// Increment when the shape of cached rows changes incompatibly; entries
/// written under another version are evicted on read and recomputed.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope around an encoded result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Encode a query result for cache storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a query result from cache storage.
///
/// # Errors
///
/// - `Error::DeserializationError`: corrupted Postcard payload
/// - `Error::InvalidCacheEntry`: invalid magic header
/// - `Error::VersionMismatch`: schema version mismatch
pub fn decode<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        warn!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
