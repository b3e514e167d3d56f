//! Optional compression of encoded values.
//!
//! Small values are stored raw; values at or above a threshold are run
//! through a [`Compressor`]. The caller records whether compression was
//! applied next to the stored bytes so reads know what to undo.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::sync::Arc;

/// Values shorter than this many bytes are never compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

/// Byte-stream compressor.
///
/// Backends take one as `Arc<dyn Compressor>`; see
/// `SqlConfig::with_compressor` and `KvConfig::with_compression`.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Compress `data`.
    ///
    /// # Errors
    /// Returns `Error::CompressionError` if the encoder fails
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`Compressor::compress`].
    ///
    /// # Errors
    /// Returns `Error::CompressionError` if `data` is not a valid stream
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Gzip compressor backed by `flate2`.
#[derive(Clone, Debug)]
pub struct GzipCompressor {
    level: flate2::Compression,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        GzipCompressor {
            level: flate2::Compression::new(level),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        GzipCompressor {
            level: flate2::Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .map_err(|e| Error::CompressionError(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| Error::CompressionError(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::CompressionError(e.to_string()))?;
        Ok(out)
    }
}

/// Threshold-gated compression policy.
#[derive(Clone)]
pub struct Compression {
    compressor: Arc<dyn Compressor>,
    threshold: usize,
}

impl Compression {
    pub fn new(compressor: Arc<dyn Compressor>, threshold: usize) -> Self {
        Compression {
            compressor,
            threshold,
        }
    }

    /// Gzip at the default threshold.
    pub fn gzip() -> Self {
        Self::new(
            Arc::new(GzipCompressor::default()),
            DEFAULT_COMPRESSION_THRESHOLD,
        )
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress `data` if it is at least `threshold` bytes long.
    ///
    /// Returns the bytes to store and whether they are compressed.
    ///
    /// # Errors
    /// Returns `Error::CompressionError` if the compressor fails
    pub fn pack(&self, data: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        if data.len() < self.threshold {
            return Ok((data, false));
        }
        let packed = self.compressor.compress(&data)?;
        debug!(
            "✓ Compressed {} bytes -> {} bytes",
            data.len(),
            packed.len()
        );
        Ok((packed, true))
    }

    /// Undo [`Compression::pack`].
    ///
    /// # Errors
    /// Returns `Error::CompressionError` if a compressed value is corrupt
    pub fn unpack(&self, data: Vec<u8>, compressed: bool) -> Result<Vec<u8>> {
        if compressed {
            self.compressor.decompress(&data)
        } else {
            Ok(data)
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::gzip()
    }
}

impl std::fmt::Debug for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compression")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
