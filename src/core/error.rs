//! Error types for the OpticalSend protocol.

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Ephemeral key generation failed. Fatal to the session.
    #[error("key generation failed: {0}")]
    KeygenFailed(String),

    /// A peer public key could not be decoded as a P-256 point.
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted ciphertext).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// HKDF expansion produced the wrong amount of key material.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// A nonce had the wrong length.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Required nonce bytes.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },
}

/// Errors in the codec layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Gzip encoding failed. Callers fall back to the identity mode.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Gzip decoding failed. Fatal for the block, triggers a NACK.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Decompressed output exceeded the expected raw size.
    #[error("decompressed size exceeded limit: {size} > {limit}")]
    SizeExceeded {
        /// Actual decompressed size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },
}

/// Errors in the journal layer.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Underlying storage failure. Transient; write paths retry with
    /// exponential backoff.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A stored row could not be decoded.
    #[error("corrupt journal row: {0}")]
    CorruptRow(String),

    /// Retries were exhausted; the session fails as `journal_unavailable`.
    #[error("journal unavailable after {attempts} attempts")]
    Unavailable {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Errors during the two-frame handshake. All fatal to the session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer frame was missing fields or carried an undecodable key.
    #[error("invalid peer frame: {0}")]
    InvalidPeerFrame(String),

    /// The peer frame referenced a different session.
    #[error("mismatched session: expected {expected}, got {actual}")]
    MismatchedSession {
        /// Our session identifier.
        expected: String,
        /// The identifier the peer sent.
        actual: String,
    },

    /// Local key generation or derivation failed.
    #[error("crypto failure during handshake: {0}")]
    Crypto(#[from] CryptoError),

    /// No valid peer frame arrived within the configured window.
    #[error("handshake timed out")]
    Timeout,

    /// The visual channel failed while the exchange was in flight.
    #[error("handshake transport failure: {0}")]
    Transport(String),

    /// A state-machine method was called out of order.
    #[error("handshake not in a state that allows {0}")]
    BadState(&'static str),
}

/// Errors in the transfer engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Crypto failure outside the per-block NACK path.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Journal failure that exhausted its retries.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Handshake failure.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// A frame could not be encoded or decoded.
    #[error("frame codec error: {0}")]
    Frame(String),

    /// The transport closed underneath the engine.
    #[error("transport closed")]
    TransportClosed,

    /// Assembly found gaps in the journaled sequence range.
    #[error("missing blocks: {missing} of {total}")]
    MissingBlocks {
        /// Sequences absent or unverified.
        missing: u32,
        /// Total sequences expected.
        total: u32,
    },

    /// The reassembled file hash did not match the manifest.
    #[error("manifest mismatch for file {file_id}")]
    ManifestMismatch {
        /// File whose digest diverged.
        file_id: String,
    },

    /// The transfer was stopped before completion.
    #[error("transfer stopped: {0}")]
    Stopped(String),
}

/// Top-level OpticalSend errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Journal error.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Transfer error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
