//! The block pipeline.
//!
//! Sender side: chunk → compress → hash compressed bytes → seal → header.
//! Receiver side: open → hash compare → decompress, in that order, so
//! tampering is caught before any decoder sees attacker-shaped input.

use std::ops::Range;

use thiserror::Error;
use uuid::Uuid;

use super::header::{BlockHeader, HeaderError};
use crate::codec::{self, Compression};
use crate::core::{CodecError, CryptoError};
use crate::crypto::{content_hash_hex, open, seal, SessionKey};

/// A sealed block ready for emission.
#[derive(Debug, Clone)]
pub struct SealedBlock {
    /// Wire header.
    pub header: BlockHeader,
    /// Ciphertext plus tag.
    pub payload: Vec<u8>,
}

/// Receiver-side recovery failures, each mapping onto a NACK reason.
#[derive(Debug, Error)]
pub enum RecoverError {
    /// Header carried an undecodable nonce.
    #[error("bad header: {0}")]
    Header(#[from] HeaderError),

    /// AEAD authentication failed.
    #[error("decrypt failed: {0}")]
    Decrypt(#[source] CryptoError),

    /// Decrypted bytes hash differently than the header claims.
    #[error("content hash mismatch: header {expected}, computed {actual}")]
    HashMismatch {
        /// Digest from the header.
        expected: String,
        /// Digest of the decrypted bytes.
        actual: String,
    },

    /// Decompression failed after authentication and hash both passed.
    #[error("decompress failed: {0}")]
    Decompress(#[source] CodecError),
}

/// Split `total_len` bytes into dense block spans of `block_size`.
///
/// A zero-byte file yields exactly one zero-length span so every file
/// has at least one block and one journal row.
pub fn chunk_spans(total_len: usize, block_size: usize) -> Vec<Range<usize>> {
    assert!(block_size > 0, "block_size must be positive");
    if total_len == 0 {
        return vec![0..0];
    }
    let mut spans = Vec::with_capacity(total_len.div_ceil(block_size));
    let mut start = 0;
    while start < total_len {
        let end = (start + block_size).min(total_len);
        spans.push(start..end);
        start = end;
    }
    spans
}

/// Build one sealed block from a raw chunk.
pub fn build_block(
    key: &SessionKey,
    file_id: Uuid,
    seq: u32,
    total_seq: u32,
    chunk: &[u8],
) -> Result<SealedBlock, CryptoError> {
    let (compression, compressed) = codec::select_best(chunk);
    let checksum = content_hash_hex(&compressed);
    let (payload, nonce) = seal(&compressed, key)?;

    let header = BlockHeader::new(
        file_id,
        Uuid::new_v4(),
        seq,
        total_seq,
        payload.len() as u32,
        chunk.len() as u32,
        compression,
        &nonce,
        checksum,
    );

    Ok(SealedBlock { header, payload })
}

/// Recover the original chunk bytes from a received block.
///
/// Order matters: authenticate, then compare the content hash, then
/// decompress. Each failure maps to a distinct NACK reason.
pub fn recover_block(
    key: &SessionKey,
    header: &BlockHeader,
    payload: &[u8],
) -> Result<Vec<u8>, RecoverError> {
    let nonce = header.iv_bytes()?;
    let compressed = open(payload, key, &nonce).map_err(RecoverError::Decrypt)?;

    let actual = content_hash_hex(&compressed);
    if actual != header.checksum {
        return Err(RecoverError::HashMismatch {
            expected: header.checksum.clone(),
            actual,
        });
    }

    codec::decode(header.compression, &compressed, header.raw_size as usize)
        .map_err(RecoverError::Decompress)
}
