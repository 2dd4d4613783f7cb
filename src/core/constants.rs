//! Protocol constants for OpticalSend.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// PROTOCOL IDENTITY
// =============================================================================

/// Protocol tag, used as the HKDF info string and in every block header.
pub const PROTOCOL_TAG: &str = "opticalsend-v1";

/// Cipher identifier carried in block headers.
pub const CIPHER_ID: &str = "AES-GCM";

/// Key-derivation identifier carried in block headers.
pub const KDF_ID: &str = "ECDH-P256";

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// AES-256-GCM key size.
pub const AEAD_KEY_SIZE: usize = 32;

/// AES-GCM nonce size (96 bits).
pub const AEAD_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// SEC1 uncompressed P-256 point size (0x04 prefix + two 32-byte coordinates).
pub const PUBLIC_KEY_SIZE: usize = 65;

/// SHA-256 digest size.
pub const HASH_SIZE: usize = 32;

/// Handshake nonce size (salts the HKDF extract step).
pub const HANDSHAKE_NONCE_SIZE: usize = 16;

/// Hex characters of a digest used as a human/resume fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = 16;

// =============================================================================
// BLOCK PIPELINE
// =============================================================================

/// Default bytes per chunk before the codec runs.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// A gzip result is kept only when strictly smaller than this fraction
/// of the input.
pub const COMPRESSION_KEEP_RATIO: f64 = 0.95;

// =============================================================================
// VISUAL CHANNEL
// =============================================================================

/// Maximum bytes a single visual frame can carry (QR version 40, level L).
pub const DEFAULT_VISUAL_FRAME_CAPACITY: usize = 2953;

/// Fraction of the frame capacity actually used, leaving headroom for
/// camera lock and frame metadata.
pub const DEFAULT_VISUAL_SAFETY_FACTOR: f64 = 0.6;

/// Minimum time each visual frame stays on screen.
pub const DEFAULT_VISUAL_HOLD: Duration = Duration::from_millis(500);

// =============================================================================
// BINARY CHANNEL
// =============================================================================

/// Backpressure threshold: binary sends pause while the channel reports
/// more than this many buffered bytes.
pub const DEFAULT_BINARY_WATERMARK: u64 = 1024 * 1024;

/// Liveness heartbeat interval on the binary channel.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// RETRANSMISSION AND TIMEOUTS
// =============================================================================

/// Retransmit attempts before a block becomes terminally skipped.
pub const DEFAULT_MAX_RETRANSMITS: u32 = 5;

/// Idle cap on the whole handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Receiver-side inactivity window per block before a NACK is emitted.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// JOURNAL RECOVERY
// =============================================================================

/// Base delay for journal write retries.
pub const JOURNAL_RETRY_BASE: Duration = Duration::from_millis(100);

/// Cap on the exponential journal retry delay.
pub const JOURNAL_RETRY_CAP: Duration = Duration::from_secs(5);

/// Journal write attempts before the session fails as `journal_unavailable`.
pub const JOURNAL_RETRY_ATTEMPTS: u32 = 5;
