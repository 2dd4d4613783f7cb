//! Control messages and the visual frame envelope.
//!
//! Control messages are compact JSON; payload messages on the binary
//! channel stay raw. The visual channel wraps everything it carries in
//! a type-tagged envelope so a scanner can dispatch on sight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::manifest::Manifest;
use crate::block::{BlockHeader, RecoverError};
use crate::handshake::HandshakeFrame;
use crate::transport::VisualChunk;

/// Why a receiver rejected a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NackReason {
    /// AEAD authentication failed.
    DecryptFailed,
    /// Decrypted bytes hash differently than the header claims.
    HashMismatch,
    /// The codec rejected the compressed bytes.
    DecompressFailed,
    /// Visual delivery stalled with chunk indices outstanding.
    MissingChunk,
}

impl NackReason {
    /// Wire string, also used for journal `last_error` fields.
    pub fn as_str(self) -> &'static str {
        match self {
            NackReason::DecryptFailed => "decrypt_failed",
            NackReason::HashMismatch => "hash_mismatch",
            NackReason::DecompressFailed => "decompress_failed",
            NackReason::MissingChunk => "missing_chunk",
        }
    }
}

impl From<&RecoverError> for NackReason {
    fn from(err: &RecoverError) -> Self {
        match err {
            RecoverError::Header(_) | RecoverError::Decrypt(_) => NackReason::DecryptFailed,
            RecoverError::HashMismatch { .. } => NackReason::HashMismatch,
            RecoverError::Decompress(_) => NackReason::DecompressFailed,
        }
    }
}

/// A control-plane message.
///
/// On the binary channel these travel as standalone JSON texts; on the
/// visual channel they ride inside [`VisualFrame::Control`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Precedes each binary payload; the next binary message is the
    /// announced block's ciphertext.
    #[serde(rename = "block-announcement", rename_all = "camelCase")]
    BlockAnnouncement {
        /// Announced sequence index.
        sequence: u32,
        /// Announced block identity.
        block_id: Uuid,
        /// Ciphertext size about to follow.
        size: u32,
        /// The block's content hash.
        content_hash: String,
        /// Full header, so the payload can be verified and recovered.
        header: BlockHeader,
    },

    /// Receiver verified and journaled a block.
    #[serde(rename = "ack", rename_all = "camelCase")]
    Ack {
        /// Acknowledged sequence index.
        sequence: u32,
        /// Acknowledged block identity.
        block_id: Uuid,
    },

    /// Receiver requests a retransmit.
    #[serde(rename = "nack", rename_all = "camelCase")]
    Nack {
        /// Owning file.
        file_id: Uuid,
        /// Rejected block identity (nil when never seen).
        block_id: Uuid,
        /// Rejected sequence index.
        sequence: u32,
        /// Rejection cause.
        reason: NackReason,
    },

    /// Optional liveness signal.
    #[serde(rename = "heartbeat", rename_all = "camelCase")]
    Heartbeat {
        /// Emission time.
        timestamp: DateTime<Utc>,
    },

    /// End-of-file manifest.
    #[serde(rename = "manifest", rename_all = "camelCase")]
    Manifest {
        /// The manifest itself.
        manifest: Manifest,
    },
}

impl ControlMessage {
    /// Announcement for a block about to travel the binary channel.
    pub fn announce(header: &BlockHeader) -> Self {
        ControlMessage::BlockAnnouncement {
            sequence: header.seq,
            block_id: header.block_id,
            size: header.payload_size,
            content_hash: header.checksum.clone(),
            header: header.clone(),
        }
    }

    /// Serialize to the compact JSON text form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from the JSON text form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Everything a visual frame can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VisualFrame {
    /// A handshake offer or ack.
    #[serde(rename = "handshake")]
    Handshake(HandshakeFrame),

    /// One slice of a block.
    #[serde(rename = "chunk")]
    Chunk(VisualChunk),

    /// A control message riding the visual path.
    #[serde(rename = "control", rename_all = "camelCase")]
    Control {
        /// The wrapped message.
        message: ControlMessage,
    },
}

impl VisualFrame {
    /// Serialize to frame bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from frame bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::build_block;
    use crate::crypto::SessionKey;

    fn header() -> BlockHeader {
        let key = SessionKey::from_bytes([0x66; 32]);
        build_block(&key, Uuid::new_v4(), 5, 9, b"announced").unwrap().header
    }

    #[test]
    fn test_announcement_wire_shape() {
        let header = header();
        let msg = ControlMessage::announce(&header);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "block-announcement");
        assert_eq!(value["sequence"], 5);
        assert_eq!(value["size"], header.payload_size);
        assert_eq!(value["contentHash"], header.checksum);
        assert!(value.get("header").is_some());
    }

    #[test]
    fn test_control_roundtrip() {
        let messages = vec![
            ControlMessage::announce(&header()),
            ControlMessage::Ack {
                sequence: 1,
                block_id: Uuid::new_v4(),
            },
            ControlMessage::Nack {
                file_id: Uuid::new_v4(),
                block_id: Uuid::nil(),
                sequence: 7,
                reason: NackReason::MissingChunk,
            },
            ControlMessage::Heartbeat {
                timestamp: Utc::now(),
            },
        ];
        for msg in messages {
            let bytes = msg.to_bytes().unwrap();
            assert_eq!(ControlMessage::from_bytes(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_nack_reason_wire_names() {
        let json = serde_json::to_string(&NackReason::DecryptFailed).unwrap();
        assert_eq!(json, "\"decrypt_failed\"");
        assert_eq!(NackReason::HashMismatch.as_str(), "hash_mismatch");
        assert_eq!(NackReason::DecompressFailed.as_str(), "decompress_failed");
        assert_eq!(NackReason::MissingChunk.as_str(), "missing_chunk");
    }

    #[test]
    fn test_visual_frame_dispatch_tags() {
        let chunk_frame = VisualFrame::Control {
            message: ControlMessage::Ack {
                sequence: 0,
                block_id: Uuid::new_v4(),
            },
        };
        let value = serde_json::to_value(&chunk_frame).unwrap();
        assert_eq!(value["type"], "control");
        assert_eq!(value["message"]["type"], "ack");

        let bytes = chunk_frame.to_bytes().unwrap();
        assert_eq!(VisualFrame::from_bytes(&bytes).unwrap(), chunk_frame);
    }

    #[test]
    fn test_recover_error_maps_to_reason() {
        use crate::block::recover_block;
        let key = SessionKey::from_bytes([0x66; 32]);
        let sealed = build_block(&key, Uuid::new_v4(), 0, 1, b"mapped").unwrap();

        let mut corrupt = sealed.payload.clone();
        corrupt[0] ^= 1;
        let err = recover_block(&key, &sealed.header, &corrupt).unwrap_err();
        assert_eq!(NackReason::from(&err), NackReason::DecryptFailed);

        let mut lying = sealed.clone();
        lying.header.checksum = "00".repeat(32);
        let err = recover_block(&key, &lying.header, &lying.payload).unwrap_err();
        assert_eq!(NackReason::from(&err), NackReason::HashMismatch);
    }
}
