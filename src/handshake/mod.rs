//! The two-frame handshake.
//!
//! Ephemeral ECDH with nonce-salted HKDF. The derived key lives only in
//! memory; sessions persist its fingerprint for resume matching.

pub mod engine;
pub mod frame;

pub use engine::{
    visual_fingerprint, FinalizedSession, ReceiverHandshake, ReceiverState, SenderHandshake,
    SenderState,
};
pub use frame::{HandshakeFrame, RequestedOptions};
