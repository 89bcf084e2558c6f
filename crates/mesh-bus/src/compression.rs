//! # Payload Compression
//!
//! Zstd block compression for the payload element of an envelope. The
//! header element is never compressed so it can be peeked cheaply.
//!
//! Decompression is bounded by `max_decompressed_bytes`: wire input is
//! untrusted and a tiny frame can expand to gigabytes.

use crate::errors::CodecError;

/// Default zstd level.
pub const DEFAULT_LEVEL: i32 = 3;

/// Payloads smaller than this are sent as plain MessagePack.
pub const DEFAULT_THRESHOLD: usize = 512;

/// Upper bound for a decompressed payload (16 MiB).
pub const MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for payload compression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Compression level (1-22, default 3)
    pub level: i32,
    /// Minimum encoded payload size before compression is attempted
    pub threshold: usize,
    /// Enable compression on encode. Decode always accepts compressed payloads.
    pub enabled: bool,
    /// Refuse to inflate a payload beyond this many bytes
    pub max_decompressed_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            threshold: DEFAULT_THRESHOLD,
            enabled: true,
            max_decompressed_bytes: MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl CompressionConfig {
    /// Never compress on encode.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Zstd compressor for envelope payloads
#[derive(Debug, Clone, Default)]
pub struct ZstdCompressor {
    config: CompressionConfig,
}

impl ZstdCompressor {
    /// Create a new Zstd compressor
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress `data` when enabled, above threshold, and actually smaller.
    ///
    /// Returns `None` when the payload should travel uncompressed.
    pub fn compress_if_worthwhile(&self, data: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        if !self.config.enabled || data.len() < self.config.threshold {
            return Ok(None);
        }

        let compressed = zstd::bulk::compress(data, self.config.level)
            .map_err(|e| CodecError::Serialization(format!("zstd compression failed: {e}")))?;

        Ok((compressed.len() < data.len()).then_some(compressed))
    }

    /// Inflate a compressed payload, bounded by `max_decompressed_bytes`.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::decompress(data, self.config.max_decompressed_bytes).map_err(|e| {
            CodecError::Deserialization(format!(
                "zstd decompression failed (limit {} bytes): {e}",
                self.config.max_decompressed_bytes
            ))
        })
    }
}
