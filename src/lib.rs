//! # OpticalSend Protocol
//!
//! Dual-channel encrypted file transfer between two peers in line of
//! sight: every block travels redundantly over a **visual channel**
//! (QR-coded byte frames) and an optional **binary channel** (an
//! ordered, backpressured peer-to-peer data channel). Whichever path
//! verifies a block first wins.
//!
//! - **Security**: ephemeral ECDH on P-256 with nonce-salted HKDF, each
//!   block independently sealed with AES-256-GCM and bound to a content
//!   hash of its compressed bytes
//! - **Durability**: every block and session is journaled, so transfers
//!   survive loss, reordering, pauses, and process restart
//! - **Redundancy**: visual and binary channels are interchangeable
//!   under the engine's view; NACK-driven retransmission runs over both
//! - **Integrity**: per-block AEAD tag plus content hash, and a
//!   whole-file digest validated against the manifest at assembly
//!
//! ## Modules
//!
//! - [`core`]: constants, configuration, and error types
//! - [`crypto`]: ECDH, HKDF, AEAD, and content hashing
//! - [`codec`]: per-block gzip compression with a selection heuristic
//! - [`block`]: chunking and the sealed-block pipeline
//! - [`journal`]: the sled-backed durable store
//! - [`handshake`]: the two-frame key agreement
//! - [`transport`]: adapter seams and visual chunk framing
//! - [`transfer`]: the sender and receiver pipelines
//!
//! ## Example
//!
//! ```no_run
//! use opticalsend_protocol::prelude::*;
//!
//! # async fn demo() -> Result<(), ProtocolError> {
//! // Each peer brings a visual adapter (QR display + camera scanner).
//! let (mut sender_visual, mut receiver_visual) = ChannelVisualAdapter::pair(64);
//! let config = ProtocolConfig::default();
//!
//! let (offer, answer) = tokio::join!(
//!     run_sender_handshake(&mut sender_visual, &config),
//!     run_receiver_handshake(
//!         &mut receiver_visual,
//!         RequestedOptions { block_size: 1024, prefer_compression: true },
//!         &config,
//!     ),
//! );
//! let (sender_session, receiver_session) = (offer?, answer?);
//!
//! // Both users compare fingerprints out of band before transferring.
//! assert_eq!(sender_session.fingerprint, receiver_session.fingerprint);
//!
//! let (sender, _handle) = SenderEngine::new(
//!     config.clone(),
//!     Journal::temporary()?,
//!     sender_session,
//!     Box::new(sender_visual),
//!     None,
//! );
//! let (receiver, _handle) = ReceiverEngine::new(
//!     config,
//!     Journal::temporary()?,
//!     receiver_session,
//!     Box::new(receiver_visual),
//!     None,
//! );
//!
//! let file = OutboundFile { filename: "photo.jpg".into(), data: vec![0u8; 4096] };
//! let (report, received) = tokio::join!(sender.run(vec![file]), receiver.run(1));
//! let (report, received) = (report?, received?);
//! assert_eq!(received[0].manifest.sha256, report.manifests[0].sha256);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod block;
pub mod codec;
pub mod core;
pub mod crypto;
pub mod handshake;
pub mod journal;
pub mod transfer;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::block::{BlockHeader, BlockRecord, BlockState, SealedBlock};
    pub use crate::codec::Compression;
    pub use crate::core::{
        CodecError, CryptoError, HandshakeError, JournalError, ProtocolConfig, ProtocolError,
        Role, TransferError,
    };
    pub use crate::crypto::SessionKey;
    pub use crate::handshake::{
        FinalizedSession, HandshakeFrame, ReceiverHandshake, RequestedOptions, SenderHandshake,
    };
    pub use crate::journal::{Journal, SessionState, StoredBlock, StoredSession};
    pub use crate::transfer::{
        run_receiver_handshake, run_sender_handshake, ControlMessage, EngineCommand,
        EngineHandle, Manifest, NackReason, OutboundFile, ReceivedFile, ReceiverEngine,
        SenderEngine, SenderReport, TransferProgress, VisualFrame,
    };
    pub use crate::transport::{
        BinaryAdapter, ChannelBinaryAdapter, ChannelVisualAdapter, VisualAdapter,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{ProtocolConfig, ProtocolError, Role};
pub use crate::journal::Journal;
pub use crate::transfer::{
    OutboundFile, ReceivedFile, ReceiverEngine, SenderEngine, SenderReport,
};
