//! Per-block compression.
//!
//! Two modes: `gzip` (deflate with gzip framing) and `none` (identity).
//! The selection heuristic keeps gzip only when it actually pays for its
//! framing overhead; the chosen mode travels in the block header.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::core::{CodecError, COMPRESSION_KEEP_RATIO};

/// Compression mode carried in a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Deflate with gzip framing.
    Gzip,
    /// Identity passthrough.
    None,
}

/// Encode `data` under the given mode.
pub fn encode(mode: Compression, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match mode {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| CodecError::CompressionFailed(e.to_string()))
        }
    }
}

/// Decode `data` under the given mode.
///
/// `max_size` bounds the decompressed output; the caller passes the
/// header's raw size so a tampered stream cannot expand past the chunk
/// it claims to be.
pub fn decode(mode: Compression, data: &[u8], max_size: usize) -> Result<Vec<u8>, CodecError> {
    match mode {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            let limit = max_size as u64;
            decoder
                .by_ref()
                .take(limit + 1)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::DecompressionFailed(e.to_string()))?;
            if out.len() > max_size {
                return Err(CodecError::SizeExceeded {
                    size: out.len(),
                    limit: max_size,
                });
            }
            Ok(out)
        }
    }
}

/// Compress `data` and keep the result only when it is strictly smaller
/// than 95% of the input. Compressor failures fall back to `none`.
pub fn select_best(data: &[u8]) -> (Compression, Vec<u8>) {
    match encode(Compression::Gzip, data) {
        Ok(compressed) => {
            let threshold = data.len() as f64 * COMPRESSION_KEEP_RATIO;
            if (compressed.len() as f64) < threshold {
                (Compression::Gzip, compressed)
            } else {
                (Compression::None, data.to_vec())
            }
        }
        Err(_) => (Compression::None, data.to_vec()),
    }
}
