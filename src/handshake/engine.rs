//! Handshake state machines.
//!
//! Two ephemeral ECDH keypairs, two nonces, one derived key. The sender
//! walks `idle → awaiting_peer → finalized`; the receiver answers in a
//! single `idle → responded` step. Any validation error lands in
//! `failed` and stays there.

use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use super::frame::{HandshakeFrame, RequestedOptions};
use crate::core::{
    HandshakeError, Role, FINGERPRINT_HEX_LEN, HANDSHAKE_NONCE_SIZE, PROTOCOL_TAG,
};
use crate::crypto::{
    content_hash_hex, derive_session_key, handshake_salt, EphemeralKeypair, SessionKey,
};

/// First hex characters of `content_hash(public_raw)`, shown to both
/// users as the out-of-band MITM check. Both sides compute it over the
/// sender's public point so the strings match.
pub fn visual_fingerprint(public_raw: &[u8]) -> String {
    content_hash_hex(public_raw)[..FINGERPRINT_HEX_LEN].to_string()
}

/// Everything the transfer engine needs once a handshake lands.
#[derive(Debug)]
pub struct FinalizedSession {
    /// Session identity both frames agreed on.
    pub session_id: Uuid,
    /// Which side this peer plays.
    pub role: Role,
    /// The derived AEAD key. Held in memory only.
    pub key: SessionKey,
    /// Human-comparable fingerprint for the MITM check.
    pub fingerprint: String,
    /// Options the receiver requested, if any.
    pub requested_options: Option<RequestedOptions>,
}

/// Sender-side handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Nothing emitted yet.
    Idle,
    /// Offer emitted, waiting on the receiver's ack frame.
    AwaitingPeer,
    /// Key derived.
    Finalized,
    /// Validation failed; terminal.
    Failed,
}

/// The sender half of the handshake.
pub struct SenderHandshake {
    session_id: Uuid,
    state: SenderState,
    keypair: Option<EphemeralKeypair>,
    nonce: [u8; HANDSHAKE_NONCE_SIZE],
    public_raw: Vec<u8>,
}

impl SenderHandshake {
    /// Prepare a handshake with a fresh session id.
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4())
    }

    /// Prepare a handshake for a known session id (resume path).
    pub fn with_session_id(session_id: Uuid) -> Self {
        Self {
            session_id,
            state: SenderState::Idle,
            keypair: None,
            nonce: [0u8; HANDSHAKE_NONCE_SIZE],
            public_raw: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Session identity this handshake binds.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Generate the keypair and nonce, emit the offer frame.
    pub fn start(&mut self, supported_block_sizes: Vec<u32>) -> Result<HandshakeFrame, HandshakeError> {
        if self.state != SenderState::Idle {
            return Err(HandshakeError::BadState("start"));
        }

        let keypair = EphemeralKeypair::generate();
        self.public_raw = keypair.public_key_bytes();
        OsRng.fill_bytes(&mut self.nonce);
        self.keypair = Some(keypair);
        self.state = SenderState::AwaitingPeer;

        tracing::debug!(session_id = %self.session_id, "handshake offer emitted");
        Ok(HandshakeFrame::offer(
            self.session_id,
            &self.public_raw,
            &self.nonce,
            supported_block_sizes,
        ))
    }

    /// Fingerprint of our own public point, displayable while waiting.
    pub fn fingerprint(&self) -> Option<String> {
        if self.public_raw.is_empty() {
            None
        } else {
            Some(visual_fingerprint(&self.public_raw))
        }
    }

    /// Validate the receiver's ack frame and derive the session key.
    pub fn finalize(&mut self, peer: &HandshakeFrame) -> Result<FinalizedSession, HandshakeError> {
        if self.state != SenderState::AwaitingPeer {
            return Err(HandshakeError::BadState("finalize"));
        }

        match self.try_finalize(peer) {
            Ok(session) => {
                self.state = SenderState::Finalized;
                tracing::info!(session_id = %self.session_id, "handshake finalized");
                Ok(session)
            }
            Err(err) => {
                self.state = SenderState::Failed;
                tracing::warn!(session_id = %self.session_id, %err, "handshake failed");
                Err(err)
            }
        }
    }

    fn try_finalize(&mut self, peer: &HandshakeFrame) -> Result<FinalizedSession, HandshakeError> {
        if peer.role != Role::Receiver {
            return Err(HandshakeError::InvalidPeerFrame(
                "expected a receiver frame".into(),
            ));
        }
        if peer.file_session_id != self.session_id {
            return Err(HandshakeError::MismatchedSession {
                expected: self.session_id.to_string(),
                actual: peer.file_session_id.to_string(),
            });
        }

        let peer_pub = peer.pub_key_bytes()?;
        let peer_nonce = peer.nonce_bytes()?;

        let keypair = self
            .keypair
            .take()
            .ok_or(HandshakeError::BadState("finalize"))?;
        let shared = keypair.derive_shared(&peer_pub)?;

        let salt = handshake_salt(&self.nonce, &peer_nonce);
        let key = derive_session_key(&shared, &salt, PROTOCOL_TAG.as_bytes())?;

        Ok(FinalizedSession {
            session_id: self.session_id,
            role: Role::Sender,
            key,
            fingerprint: visual_fingerprint(&self.public_raw),
            requested_options: peer.requested_options.clone(),
        })
    }
}

impl Default for SenderHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver-side handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// No sender frame scanned yet.
    Idle,
    /// Ack emitted, key derived.
    Responded,
    /// Validation failed; terminal.
    Failed,
}

/// The receiver half of the handshake.
pub struct ReceiverHandshake {
    state: ReceiverState,
    requested_options: RequestedOptions,
}

impl ReceiverHandshake {
    /// Prepare a receiver with the options it will request.
    pub fn new(requested_options: RequestedOptions) -> Self {
        Self {
            state: ReceiverState::Idle,
            requested_options,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Consume a scanned sender frame: derive the key and emit the ack.
    pub fn respond(
        &mut self,
        sender_frame: &HandshakeFrame,
    ) -> Result<(HandshakeFrame, FinalizedSession), HandshakeError> {
        if self.state != ReceiverState::Idle {
            return Err(HandshakeError::BadState("respond"));
        }

        match self.try_respond(sender_frame) {
            Ok(out) => {
                self.state = ReceiverState::Responded;
                tracing::info!(session_id = %sender_frame.file_session_id, "handshake answered");
                Ok(out)
            }
            Err(err) => {
                self.state = ReceiverState::Failed;
                tracing::warn!(%err, "handshake failed");
                Err(err)
            }
        }
    }

    fn try_respond(
        &self,
        sender_frame: &HandshakeFrame,
    ) -> Result<(HandshakeFrame, FinalizedSession), HandshakeError> {
        if sender_frame.role != Role::Sender {
            return Err(HandshakeError::InvalidPeerFrame(
                "expected a sender frame".into(),
            ));
        }

        let sender_pub = sender_frame.pub_key_bytes()?;
        let sender_nonce = sender_frame.nonce_bytes()?;

        let keypair = EphemeralKeypair::generate();
        let public_raw = keypair.public_key_bytes();
        let mut nonce = [0u8; HANDSHAKE_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let shared = keypair.derive_shared(&sender_pub)?;
        let salt = handshake_salt(&sender_nonce, &nonce);
        let key = derive_session_key(&shared, &salt, PROTOCOL_TAG.as_bytes())?;

        let ack = HandshakeFrame::ack(
            sender_frame.file_session_id,
            &public_raw,
            &nonce,
            self.requested_options.clone(),
        );

        let session = FinalizedSession {
            session_id: sender_frame.file_session_id,
            role: Role::Receiver,
            key,
            // Both users compare the digest of the sender's point.
            fingerprint: visual_fingerprint(&sender_pub),
            requested_options: Some(self.requested_options.clone()),
        };

        Ok((ack, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{open, seal};

    fn default_options() -> RequestedOptions {
        RequestedOptions {
            block_size: 1024,
            prefer_compression: true,
        }
    }

    fn run_handshake() -> (FinalizedSession, FinalizedSession) {
        let mut sender = SenderHandshake::new();
        let offer = sender.start(vec![512, 1024, 2048]).unwrap();

        let mut receiver = ReceiverHandshake::new(default_options());
        let (ack, receiver_session) = receiver.respond(&offer).unwrap();

        let sender_session = sender.finalize(&ack).unwrap();
        (sender_session, receiver_session)
    }

    #[test]
    fn test_both_sides_derive_equal_keys() {
        let (sender, receiver) = run_handshake();
        assert_eq!(sender.key.as_bytes(), receiver.key.as_bytes());
        assert_eq!(sender.session_id, receiver.session_id);
        assert_eq!(sender.fingerprint, receiver.fingerprint);
    }

    #[test]
    fn test_keys_interoperate_through_aead() {
        let (sender, receiver) = run_handshake();
        let (ciphertext, nonce) = seal(b"first sealed payload", &sender.key).unwrap();
        let opened = open(&ciphertext, &receiver.key, &nonce).unwrap();
        assert_eq!(opened, b"first sealed payload");
    }

    #[test]
    fn test_state_progression() {
        let mut sender = SenderHandshake::new();
        assert_eq!(sender.state(), SenderState::Idle);

        let offer = sender.start(vec![1024]).unwrap();
        assert_eq!(sender.state(), SenderState::AwaitingPeer);
        assert!(sender.fingerprint().is_some());

        let mut receiver = ReceiverHandshake::new(default_options());
        let (ack, _) = receiver.respond(&offer).unwrap();
        assert_eq!(receiver.state(), ReceiverState::Responded);

        sender.finalize(&ack).unwrap();
        assert_eq!(sender.state(), SenderState::Finalized);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut sender = SenderHandshake::new();
        sender.start(vec![1024]).unwrap();
        assert!(matches!(
            sender.start(vec![1024]),
            Err(HandshakeError::BadState(_))
        ));
    }

    #[test]
    fn test_mismatched_session_fails() {
        let mut sender = SenderHandshake::new();
        let offer = sender.start(vec![1024]).unwrap();

        let mut receiver = ReceiverHandshake::new(default_options());
        let (mut ack, _) = receiver.respond(&offer).unwrap();
        ack.file_session_id = Uuid::new_v4();

        let err = sender.finalize(&ack).unwrap_err();
        assert!(matches!(err, HandshakeError::MismatchedSession { .. }));
        assert_eq!(sender.state(), SenderState::Failed);
    }

    #[test]
    fn test_wrong_role_frame_fails() {
        let mut sender = SenderHandshake::new();
        let offer = sender.start(vec![1024]).unwrap();

        // Feeding the sender its own offer back is an invalid peer frame.
        let err = sender.finalize(&offer.clone()).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPeerFrame(_)));

        let mut receiver = ReceiverHandshake::new(default_options());
        let bad = HandshakeFrame::ack(Uuid::new_v4(), &[4u8; 65], &[0u8; 16], default_options());
        let err = receiver.respond(&bad).unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidPeerFrame(_)));
        assert_eq!(receiver.state(), ReceiverState::Failed);
    }

    #[test]
    fn test_garbage_public_key_fails() {
        let mut sender = SenderHandshake::new();
        let offer = sender.start(vec![1024]).unwrap();

        let mut receiver = ReceiverHandshake::new(default_options());
        let mut tampered = offer.clone();
        tampered.pub_key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [0u8; 65],
        );
        let err = receiver.respond(&tampered).unwrap_err();
        assert!(matches!(err, HandshakeError::Crypto(_)));
    }

    #[test]
    fn test_receiver_options_reach_sender() {
        let (sender_session, _) = run_handshake();
        let options = sender_session.requested_options.unwrap();
        assert_eq!(options.block_size, 1024);
        assert!(options.prefer_compression);
    }

    #[test]
    fn test_fingerprint_is_short_hex() {
        let (sender, _) = run_handshake();
        assert_eq!(sender.fingerprint.len(), FINGERPRINT_HEX_LEN);
        assert!(sender.fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
