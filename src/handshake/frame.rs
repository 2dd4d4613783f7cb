//! Handshake wire frames.
//!
//! One JSON frame per direction: the sender's offer and the receiver's
//! ack. Byte fields are base64; identifiers are canonical UUID text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Compression;
use crate::core::{HandshakeError, Role, HANDSHAKE_NONCE_SIZE};

/// Options the receiver asks the sender to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedOptions {
    /// Preferred chunk size in bytes.
    pub block_size: u32,
    /// Whether the receiver wants compression attempted at all.
    pub prefer_compression: bool,
}

/// A handshake frame, scanned over the visual channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeFrame {
    /// Which side emitted the frame.
    pub role: Role,
    /// Session identity; both frames must agree.
    pub file_session_id: Uuid,
    /// Base64 SEC1 uncompressed public point.
    pub pub_key: String,
    /// Base64 16-byte HKDF salt contribution.
    pub nonce: String,
    /// Codec modes the sender can produce (sender frame only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offered_compression: Option<Vec<Compression>>,
    /// Chunk sizes the sender can produce (sender frame only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_block_sizes: Option<Vec<u32>>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Receiver's acknowledgment flag (receiver frame only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<bool>,
    /// Receiver's preferences (receiver frame only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_options: Option<RequestedOptions>,
}

impl HandshakeFrame {
    /// Build the sender's offer frame.
    pub fn offer(
        session_id: Uuid,
        public_raw: &[u8],
        nonce: &[u8; HANDSHAKE_NONCE_SIZE],
        supported_block_sizes: Vec<u32>,
    ) -> Self {
        Self {
            role: Role::Sender,
            file_session_id: session_id,
            pub_key: BASE64.encode(public_raw),
            nonce: BASE64.encode(nonce),
            offered_compression: Some(vec![Compression::Gzip, Compression::None]),
            supported_block_sizes: Some(supported_block_sizes),
            timestamp: Utc::now(),
            ack: None,
            requested_options: None,
        }
    }

    /// Build the receiver's ack frame.
    pub fn ack(
        session_id: Uuid,
        public_raw: &[u8],
        nonce: &[u8; HANDSHAKE_NONCE_SIZE],
        requested_options: RequestedOptions,
    ) -> Self {
        Self {
            role: Role::Receiver,
            file_session_id: session_id,
            pub_key: BASE64.encode(public_raw),
            nonce: BASE64.encode(nonce),
            offered_compression: None,
            supported_block_sizes: None,
            timestamp: Utc::now(),
            ack: Some(true),
            requested_options: Some(requested_options),
        }
    }

    /// Decode the peer's public point bytes.
    pub fn pub_key_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        BASE64
            .decode(&self.pub_key)
            .map_err(|_| HandshakeError::InvalidPeerFrame("undecodable pubKey".into()))
    }

    /// Decode the peer's handshake nonce.
    pub fn nonce_bytes(&self) -> Result<[u8; HANDSHAKE_NONCE_SIZE], HandshakeError> {
        let raw = BASE64
            .decode(&self.nonce)
            .map_err(|_| HandshakeError::InvalidPeerFrame("undecodable nonce".into()))?;
        raw.try_into()
            .map_err(|_| HandshakeError::InvalidPeerFrame("nonce must be 16 bytes".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_frame_shape() {
        let frame = HandshakeFrame::offer(Uuid::new_v4(), &[4u8; 65], &[7u8; 16], vec![1024]);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["role"], "sender");
        assert!(value.get("fileSessionId").is_some());
        assert!(value.get("pubKey").is_some());
        assert!(value.get("offeredCompression").is_some());
        assert!(value.get("supportedBlockSizes").is_some());
        assert!(value.get("ack").is_none());
        assert!(value.get("requestedOptions").is_none());
    }

    #[test]
    fn test_ack_frame_shape() {
        let options = RequestedOptions {
            block_size: 1024,
            prefer_compression: true,
        };
        let frame = HandshakeFrame::ack(Uuid::new_v4(), &[4u8; 65], &[7u8; 16], options);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["role"], "receiver");
        assert_eq!(value["ack"], true);
        assert_eq!(value["requestedOptions"]["blockSize"], 1024);
    }

    #[test]
    fn test_nonce_roundtrip() {
        let nonce = [0x3C; 16];
        let frame = HandshakeFrame::offer(Uuid::new_v4(), &[4u8; 65], &nonce, vec![]);
        assert_eq!(frame.nonce_bytes().unwrap(), nonce);
    }

    #[test]
    fn test_bad_nonce_rejected() {
        let mut frame = HandshakeFrame::offer(Uuid::new_v4(), &[4u8; 65], &[0; 16], vec![]);
        frame.nonce = BASE64.encode([0u8; 8]);
        assert!(matches!(
            frame.nonce_bytes(),
            Err(HandshakeError::InvalidPeerFrame(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let frame = HandshakeFrame::offer(Uuid::new_v4(), &[4u8; 65], &[7u8; 16], vec![512, 1024]);
        let json = serde_json::to_vec(&frame).unwrap();
        let parsed: HandshakeFrame = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, frame);
    }
}
