//! The end-of-transfer manifest.
//!
//! Binds file identity to whole-file integrity; validated at assembly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::content_hash_hex;

/// Emitted by the sender once every block of a file went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// File identity.
    pub file_id: Uuid,
    /// Original filename.
    pub filename: String,
    /// Total size in bytes.
    pub total_size: u64,
    /// Total block count.
    pub total_blocks: u32,
    /// Hex digest of the whole file.
    pub sha256: String,
}

impl Manifest {
    /// Build a manifest over the file's full contents.
    pub fn for_file(file_id: Uuid, filename: &str, data: &[u8], total_blocks: u32) -> Self {
        Self {
            file_id,
            filename: filename.to_string(),
            total_size: data.len() as u64,
            total_blocks,
            sha256: content_hash_hex(data),
        }
    }

    /// Whether `data` matches the manifest digest and size.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.total_size && content_hash_hex(data) == self.sha256
    }
}
