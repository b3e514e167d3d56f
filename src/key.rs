//! Cache key derivation.
//!
//! A [`CacheKey`] is the SHA-256 fingerprint of a query's compiled SQL text
//! and its positional parameters. Two queries built separately but compiling
//! to the same text and parameter values share a key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single positional query parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        QueryParam::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        QueryParam::Int(i64::from(v))
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        QueryParam::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        QueryParam::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        QueryParam::Text(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        QueryParam::Text(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        QueryParam::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(QueryParam::Null, Into::into)
    }
}

/// Canonical form of a query: SQL text plus ordered parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<QueryParam>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        CompiledQuery {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.parameters.push(param.into());
        self
    }

    /// Derive the cache key for this query.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(self)
    }
}

/// Fixed-length fingerprint of a [`CompiledQuery`], as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hex length of every key (SHA-256).
    pub const LEN: usize = 64;

    /// Derive the key for a compiled query.
    ///
    /// Every field is length-prefixed and every parameter type-tagged, so
    /// `("ab", ["c"])` and `("a", ["bc"])` never collide by concatenation.
    pub fn derive(query: &CompiledQuery) -> Self {
        let mut hasher = Sha256::new();
        write_bytes(&mut hasher, query.sql.as_bytes());
        hasher.update((query.parameters.len() as u64).to_le_bytes());

        for param in &query.parameters {
            match param {
                QueryParam::Null => hasher.update([0u8]),
                QueryParam::Bool(v) => hasher.update([1u8, u8::from(*v)]),
                QueryParam::Int(v) => {
                    hasher.update([2u8]);
                    hasher.update(v.to_le_bytes());
                }
                QueryParam::Float(v) => {
                    hasher.update([3u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                QueryParam::Text(v) => {
                    hasher.update([4u8]);
                    write_bytes(&mut hasher, v.as_bytes());
                }
                QueryParam::Bytes(v) => {
                    hasher.update([5u8]);
                    write_bytes(&mut hasher, v);
                }
            }
        }

        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
