//! The on-wire block header.
//!
//! Immutable once emitted. JSON-shaped with camelCase field names; byte
//! fields are base64, digests are lowercase hex.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::codec::Compression;
use crate::core::{AEAD_NONCE_SIZE, CIPHER_ID, KDF_ID, PROTOCOL_TAG};

/// Errors decoding a header or the block wire form around it.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// JSON (de)serialization failed.
    #[error("header json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `iv` field was not 12 base64-encoded bytes.
    #[error("invalid iv field")]
    InvalidIv,

    /// A length-prefixed block wire buffer was truncated.
    #[error("block wire too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// The header named a protocol this implementation does not speak.
    #[error("unknown protocol tag: {0}")]
    UnknownProtocol(String),
}

/// Metadata paired with every encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Constant protocol tag.
    pub protocol: String,
    /// File this block belongs to.
    pub file_id: Uuid,
    /// Identity of this block, stable across retransmits.
    pub block_id: Uuid,
    /// 0-based sequence index.
    pub seq: u32,
    /// Total sequence count for the file.
    pub total_seq: u32,
    /// Bytes of ciphertext plus tag.
    pub payload_size: u32,
    /// Bytes of the original chunk, before compression.
    pub raw_size: u32,
    /// Codec mode applied before encryption.
    pub compression: Compression,
    /// AEAD identifier.
    pub encryption: String,
    /// Base64-encoded 96-bit nonce.
    pub iv: String,
    /// Key-derivation identifier.
    pub kdf: String,
    /// Hex digest of the compressed pre-encryption bytes.
    pub checksum: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl BlockHeader {
    /// Assemble a header for a freshly sealed block.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: Uuid,
        block_id: Uuid,
        seq: u32,
        total_seq: u32,
        payload_size: u32,
        raw_size: u32,
        compression: Compression,
        nonce: &[u8; AEAD_NONCE_SIZE],
        checksum: String,
    ) -> Self {
        Self {
            protocol: PROTOCOL_TAG.to_string(),
            file_id,
            block_id,
            seq,
            total_seq,
            payload_size,
            raw_size,
            compression,
            encryption: CIPHER_ID.to_string(),
            iv: BASE64.encode(nonce),
            kdf: KDF_ID.to_string(),
            checksum,
            timestamp: Utc::now(),
        }
    }

    /// Decode the nonce back out of the `iv` field.
    pub fn iv_bytes(&self) -> Result<[u8; AEAD_NONCE_SIZE], HeaderError> {
        let decoded = BASE64.decode(&self.iv).map_err(|_| HeaderError::InvalidIv)?;
        decoded.try_into().map_err(|_| HeaderError::InvalidIv)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>, HeaderError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from the JSON wire form, rejecting foreign protocol tags.
    pub fn from_json(bytes: &[u8]) -> Result<Self, HeaderError> {
        let header: Self = serde_json::from_slice(bytes)?;
        if header.protocol != PROTOCOL_TAG {
            return Err(HeaderError::UnknownProtocol(header.protocol));
        }
        Ok(header)
    }
}
