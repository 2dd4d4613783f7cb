//! Visual chunk framing.
//!
//! A flat block buffer rarely fits one QR frame, so it is sliced into
//! chunks of at most the effective frame capacity. The receiver
//! reassembles by `(block_id, chunk_index)`; a block is delivered
//! visually only once every index is present.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::block::BlockHeader;

/// Errors reassembling visual chunks.
#[derive(Debug, Error)]
pub enum VisualError {
    /// A chunk's payload field was not valid base64.
    #[error("undecodable chunk payload")]
    BadPayload,

    /// A chunk disagreed with its block's established geometry.
    #[error("chunk geometry mismatch for block {block_id}: {detail}")]
    GeometryMismatch {
        /// Block the chunk claimed to extend.
        block_id: Uuid,
        /// What disagreed.
        detail: String,
    },
}

/// One visual frame's worth of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualChunk {
    /// Owning file.
    pub file_id: Uuid,
    /// Owning block.
    pub block_id: Uuid,
    /// Block sequence index, repeated for display purposes.
    pub seq: u32,
    /// 0-based index of this slice.
    pub chunk_index: u32,
    /// Total slices for the block.
    pub chunk_count: u32,
    /// Bytes in this slice.
    pub chunk_size: u32,
    /// The block's content hash, identifying the block across frames.
    pub checksum: String,
    /// Base64 slice of the flat block buffer.
    pub payload: String,
}

impl VisualChunk {
    /// Decode this slice's bytes.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, VisualError> {
        BASE64.decode(&self.payload).map_err(|_| VisualError::BadPayload)
    }
}

/// Slice a flat block buffer into visual chunks of at most `budget` bytes.
///
/// Always yields at least one chunk; single-frame blocks use
/// `chunk_count = 1`.
pub fn split_block(header: &BlockHeader, block_wire: &[u8], budget: usize) -> Vec<VisualChunk> {
    let budget = budget.max(1);
    let chunk_count = block_wire.len().div_ceil(budget).max(1) as u32;

    (0..chunk_count)
        .map(|index| {
            let start = index as usize * budget;
            let end = (start + budget).min(block_wire.len());
            let slice = &block_wire[start..end];
            VisualChunk {
                file_id: header.file_id,
                block_id: header.block_id,
                seq: header.seq,
                chunk_index: index,
                chunk_count,
                chunk_size: slice.len() as u32,
                checksum: header.checksum.clone(),
                payload: BASE64.encode(slice),
            }
        })
        .collect()
}

struct PartialBlock {
    chunk_count: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
}

/// Reassembles blocks from out-of-order, duplicated visual chunks.
pub struct ChunkReassembler {
    partial: HashMap<Uuid, PartialBlock>,
}

impl ChunkReassembler {
    /// Empty reassembler.
    pub fn new() -> Self {
        Self {
            partial: HashMap::new(),
        }
    }

    /// Absorb one chunk. Returns the complete flat block buffer once the
    /// final missing index arrives; duplicates are ignored.
    pub fn insert(&mut self, chunk: &VisualChunk) -> Result<Option<Vec<u8>>, VisualError> {
        let bytes = chunk.payload_bytes()?;
        if bytes.len() != chunk.chunk_size as usize {
            return Err(VisualError::GeometryMismatch {
                block_id: chunk.block_id,
                detail: format!(
                    "chunkSize {} but payload has {} bytes",
                    chunk.chunk_size,
                    bytes.len()
                ),
            });
        }
        if chunk.chunk_count == 0 || chunk.chunk_index >= chunk.chunk_count {
            return Err(VisualError::GeometryMismatch {
                block_id: chunk.block_id,
                detail: format!(
                    "chunkIndex {} outside chunkCount {}",
                    chunk.chunk_index, chunk.chunk_count
                ),
            });
        }

        let partial = self
            .partial
            .entry(chunk.block_id)
            .or_insert_with(|| PartialBlock {
                chunk_count: chunk.chunk_count,
                chunks: BTreeMap::new(),
            });

        if partial.chunk_count != chunk.chunk_count {
            return Err(VisualError::GeometryMismatch {
                block_id: chunk.block_id,
                detail: format!(
                    "chunkCount changed from {} to {}",
                    partial.chunk_count, chunk.chunk_count
                ),
            });
        }

        partial.chunks.entry(chunk.chunk_index).or_insert(bytes);

        if partial.chunks.len() as u32 != partial.chunk_count {
            return Ok(None);
        }
        match self.partial.remove(&chunk.block_id) {
            Some(done) => {
                let mut wire = Vec::new();
                for (_, slice) in done.chunks {
                    wire.extend_from_slice(&slice);
                }
                Ok(Some(wire))
            }
            None => Ok(None),
        }
    }

    /// Blocks with at least one chunk but not all of them, for
    /// `missing_chunk` NACKs.
    pub fn incomplete_blocks(&self) -> Vec<Uuid> {
        self.partial.keys().copied().collect()
    }

    /// Drop partial state for a block (after a NACK retransmit begins).
    pub fn forget(&mut self, block_id: Uuid) {
        self.partial.remove(&block_id);
    }
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{build_block, encode_block_wire};
    use crate::crypto::SessionKey;

    fn sealed_wire() -> (BlockHeader, Vec<u8>) {
        let key = SessionKey::from_bytes([0x55; 32]);
        let chunk: Vec<u8> = (0..2200u32).map(|i| (i % 256) as u8).collect();
        let sealed = build_block(&key, Uuid::new_v4(), 0, 1, &chunk).unwrap();
        let wire = encode_block_wire(&sealed.header, &sealed.payload).unwrap();
        (sealed.header, wire)
    }

    #[test]
    fn test_split_respects_budget() {
        let (header, wire) = sealed_wire();
        let chunks = split_block(&header, &wire, 500);

        assert_eq!(chunks.len(), wire.len().div_ceil(500));
        assert!(chunks.iter().all(|c| c.chunk_size <= 500));
        assert!(chunks.iter().all(|c| c.chunk_count == chunks.len() as u32));

        let total: usize = chunks.iter().map(|c| c.chunk_size as usize).sum();
        assert_eq!(total, wire.len());
    }

    #[test]
    fn test_small_block_is_single_frame() {
        let (header, wire) = sealed_wire();
        let chunks = split_block(&header, &wire, wire.len() + 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_count, 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_reassembly_in_order() {
        let (header, wire) = sealed_wire();
        let chunks = split_block(&header, &wire, 600);
        let mut reassembler = ChunkReassembler::new();

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(reassembler.insert(chunk).unwrap().is_none());
        }
        let out = reassembler
            .insert(chunks.last().unwrap())
            .unwrap()
            .expect("final chunk completes the block");
        assert_eq!(out, wire);
        assert!(reassembler.incomplete_blocks().is_empty());
    }

    #[test]
    fn test_reassembly_out_of_order_with_duplicates() {
        let (header, wire) = sealed_wire();
        let mut chunks = split_block(&header, &wire, 400);
        assert!(chunks.len() >= 3);

        chunks.reverse();
        let duplicate = chunks[1].clone();

        let mut reassembler = ChunkReassembler::new();
        let mut completed = None;
        for chunk in &chunks {
            if let Some(out) = reassembler.insert(chunk).unwrap() {
                completed = Some(out);
            }
            // Replay a chunk mid-stream; must be a no-op.
            let _ = reassembler.insert(&duplicate);
        }
        assert_eq!(completed.unwrap(), wire);
    }

    #[test]
    fn test_incomplete_blocks_reported() {
        let (header, wire) = sealed_wire();
        let chunks = split_block(&header, &wire, 400);

        let mut reassembler = ChunkReassembler::new();
        reassembler.insert(&chunks[0]).unwrap();
        assert_eq!(reassembler.incomplete_blocks(), vec![header.block_id]);

        reassembler.forget(header.block_id);
        assert!(reassembler.incomplete_blocks().is_empty());
    }

    #[test]
    fn test_geometry_mismatch_rejected() {
        let (header, wire) = sealed_wire();
        let chunks = split_block(&header, &wire, 400);

        let mut reassembler = ChunkReassembler::new();
        reassembler.insert(&chunks[0]).unwrap();

        let mut liar = chunks[1].clone();
        liar.chunk_count += 1;
        assert!(matches!(
            reassembler.insert(&liar),
            Err(VisualError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let (header, wire) = sealed_wire();
        let mut chunk = split_block(&header, &wire, 400).remove(0);
        chunk.payload = "!!!not base64!!!".to_string();
        assert!(matches!(
            ChunkReassembler::new().insert(&chunk),
            Err(VisualError::BadPayload)
        ));
    }

    #[test]
    fn test_chunk_wire_shape() {
        let (header, wire) = sealed_wire();
        let chunk = &split_block(&header, &wire, 400)[0];
        let value = serde_json::to_value(chunk).unwrap();
        assert!(value.get("fileId").is_some());
        assert!(value.get("blockId").is_some());
        assert!(value.get("chunkIndex").is_some());
        assert!(value.get("chunkCount").is_some());
        assert!(value.get("chunkSize").is_some());
    }
}
