//! Cryptographic primitives.
//!
//! ECDH on P-256, HKDF-SHA256 key derivation, AES-256-GCM sealing, and
//! SHA-256 content hashing. No custom constructions; each operation maps
//! onto a standards-named primitive.

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal};
pub use hash::{content_hash, content_hash_hex};
pub use kdf::{derive_session_key, handshake_salt, SessionKey};
pub use keys::{import_public_raw, EphemeralKeypair, SharedBits};
