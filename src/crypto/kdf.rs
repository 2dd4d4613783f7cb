//! Session key derivation.
//!
//! HKDF-SHA256 over the raw ECDH shared bits, salted with a hash of both
//! handshake nonces. The derived key is zeroized on drop; only its
//! fingerprint may cross a persistence boundary.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::hash::content_hash;
use super::keys::SharedBits;
use crate::core::{CryptoError, AEAD_KEY_SIZE, FINGERPRINT_HEX_LEN};

/// A derived 256-bit AEAD session key.
///
/// Zeroized on drop. Never serialized; the journal stores only the
/// fingerprint for resume matching.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; AEAD_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key material (tests and derivation only).
    pub fn from_bytes(bytes: [u8; AEAD_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; AEAD_KEY_SIZE] {
        &self.0
    }

    /// Truncated hash of the key, safe to persist for resume matching.
    pub fn fingerprint(&self) -> String {
        let digest = content_hash(&self.0);
        hex::encode(digest)[..FINGERPRINT_HEX_LEN].to_string()
    }
}

impl std::fmt::Debug for SessionKey {
    // Key material never reaches logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Derive the session key from shared bits.
///
/// HKDF extract with `salt`, expand with `info` to exactly 32 bytes.
pub fn derive_session_key(
    shared: &SharedBits,
    salt: &[u8],
    info: &[u8],
) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
    let mut okm = [0u8; AEAD_KEY_SIZE];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SessionKey(okm))
}

/// Salt for the HKDF extract step: a hash over both handshake nonces.
pub fn handshake_salt(sender_nonce: &[u8], receiver_nonce: &[u8]) -> [u8; 32] {
    let mut joined = Vec::with_capacity(sender_nonce.len() + receiver_nonce.len());
    joined.extend_from_slice(sender_nonce);
    joined.extend_from_slice(receiver_nonce);
    content_hash(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PROTOCOL_TAG;
    use crate::crypto::keys::EphemeralKeypair;

    fn derive_pair() -> (SessionKey, SessionKey) {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();

        let salt = handshake_salt(b"nonce-sender-16b", b"nonce-receivr16b");
        let a = derive_session_key(
            &alice.derive_shared(&bob_pub).unwrap(),
            &salt,
            PROTOCOL_TAG.as_bytes(),
        )
        .unwrap();
        let b = derive_session_key(
            &bob.derive_shared(&alice_pub).unwrap(),
            &salt,
            PROTOCOL_TAG.as_bytes(),
        )
        .unwrap();
        (a, b)
    }

    #[test]
    fn test_both_sides_derive_equal_keys() {
        let (a, b) = derive_pair();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_shape() {
        let key = SessionKey::from_bytes([0x42; 32]);
        let fp = key.fingerprint();
        assert_eq!(fp.len(), FINGERPRINT_HEX_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_salt_depends_on_both_nonces() {
        let base = handshake_salt(b"aaaa", b"bbbb");
        assert_ne!(base, handshake_salt(b"aaab", b"bbbb"));
        assert_ne!(base, handshake_salt(b"aaaa", b"bbbc"));
        // Nonce order matters.
        assert_ne!(base, handshake_salt(b"bbbb", b"aaaa"));
    }

    #[test]
    fn test_debug_never_prints_key_bytes() {
        let key = SessionKey::from_bytes([0xAB; 32]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("171")); // 0xAB
        assert!(printed.starts_with("SessionKey("));
    }
}
