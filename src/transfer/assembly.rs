//! Terminal assembly and manifest validation.
//!
//! Fetch every journal row for the file, sort by sequence, concatenate
//! the recovered payloads, and compare the whole-file digest against the
//! manifest. Either failure is fatal for the transfer.

use uuid::Uuid;

use super::manifest::Manifest;
use crate::block::BlockState;
use crate::core::TransferError;
use crate::journal::Journal;

/// Reassemble a file from its journal rows and validate it.
pub fn assemble_file(
    journal: &Journal,
    file_id: Uuid,
    manifest: &Manifest,
) -> Result<Vec<u8>, TransferError> {
    let mut rows = journal.get_blocks_for_file(file_id)?;
    rows.sort_by_key(|row| row.seq);

    let total = manifest.total_blocks;
    let usable = rows
        .iter()
        .filter(|row| {
            row.state == BlockState::Completed && row.verified && row.decompressed.is_some()
        })
        .count() as u32;

    if usable < total {
        return Err(TransferError::MissingBlocks {
            missing: total - usable,
            total,
        });
    }

    // Dense coverage check: sequences must be exactly [0, total).
    let mut expected = 0u32;
    let mut data = Vec::with_capacity(manifest.total_size as usize);
    for row in &rows {
        if row.seq != expected {
            return Err(TransferError::MissingBlocks {
                missing: total.saturating_sub(usable),
                total,
            });
        }
        match &row.decompressed {
            Some(plain) => data.extend_from_slice(plain),
            None => {
                return Err(TransferError::MissingBlocks {
                    missing: 1,
                    total,
                })
            }
        }
        expected += 1;
    }

    if !manifest.matches(&data) {
        tracing::warn!(%file_id, "assembled file digest does not match manifest");
        return Err(TransferError::ManifestMismatch {
            file_id: file_id.to_string(),
        });
    }

    tracing::info!(%file_id, bytes = data.len(), "file assembled and verified");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{build_block, chunk_spans};
    use crate::crypto::SessionKey;
    use crate::journal::StoredBlock;

    fn journal_with_file(data: &[u8], block_size: usize) -> (Journal, Uuid, Manifest) {
        let journal = Journal::temporary().unwrap();
        let key = SessionKey::from_bytes([0x88; 32]);
        let file_id = Uuid::new_v4();
        let spans = chunk_spans(data.len(), block_size);
        let total = spans.len() as u32;

        for (seq, span) in spans.into_iter().enumerate() {
            let chunk = &data[span];
            let sealed = build_block(&key, file_id, seq as u32, total, chunk).unwrap();
            journal
                .put_block(&StoredBlock {
                    file_id,
                    seq: seq as u32,
                    header: sealed.header,
                    payload: sealed.payload,
                    decompressed: Some(chunk.to_vec()),
                    state: BlockState::Completed,
                    verified: true,
                })
                .unwrap();
        }

        let manifest = Manifest::for_file(file_id, "data.bin", data, total);
        (journal, file_id, manifest)
    }

    #[test]
    fn test_assembles_multi_block_file() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i * 31 % 256) as u8).collect();
        let (journal, file_id, manifest) = journal_with_file(&data, 1024);

        let out = assemble_file(&journal, file_id, &manifest).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_assembles_empty_file() {
        let (journal, file_id, manifest) = journal_with_file(b"", 1024);
        let out = assemble_file(&journal, file_id, &manifest).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_block_detected() {
        let data = vec![7u8; 2500];
        let (journal, file_id, manifest) = journal_with_file(&data, 1024);

        // Drop the middle row.
        let mut rows = journal.get_blocks_for_file(file_id).unwrap();
        rows.sort_by_key(|r| r.seq);
        journal.delete_blocks_for_file(file_id).unwrap();
        for row in rows.iter().filter(|r| r.seq != 1) {
            journal.put_block(row).unwrap();
        }

        let err = assemble_file(&journal, file_id, &manifest).unwrap_err();
        assert!(matches!(
            err,
            TransferError::MissingBlocks { missing: 1, total: 3 }
        ));
    }

    #[test]
    fn test_unverified_block_counts_as_missing() {
        let data = vec![9u8; 1500];
        let (journal, file_id, manifest) = journal_with_file(&data, 1024);

        let mut rows = journal.get_blocks_for_file(file_id).unwrap();
        rows.sort_by_key(|r| r.seq);
        let mut tail = rows.pop().unwrap();
        tail.verified = false;
        journal.put_block(&tail).unwrap();

        let err = assemble_file(&journal, file_id, &manifest).unwrap_err();
        assert!(matches!(err, TransferError::MissingBlocks { .. }));
    }

    #[test]
    fn test_manifest_mismatch_detected() {
        let data = vec![1u8; 600];
        let (journal, file_id, mut manifest) = journal_with_file(&data, 1024);
        manifest.sha256 = "00".repeat(32);

        let err = assemble_file(&journal, file_id, &manifest).unwrap_err();
        assert!(matches!(err, TransferError::ManifestMismatch { .. }));
    }
}
