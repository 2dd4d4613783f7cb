//! P-256 ephemeral key management.
//!
//! Each session uses a fresh ephemeral keypair; the private half never
//! leaves this module and is consumed by the Diffie-Hellman step.

use p256::{ecdh::EphemeralSecret, EncodedPoint, PublicKey};
use rand::rngs::OsRng;

use crate::core::{CryptoError, HASH_SIZE};

/// Raw ECDH shared bits, before any hashing or derivation.
pub struct SharedBits([u8; HASH_SIZE]);

impl std::fmt::Debug for SharedBits {
    // Key material never reaches logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedBits(..)")
    }
}

impl SharedBits {
    /// Borrow the raw shared secret bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

/// An ephemeral P-256 keypair for a single handshake.
///
/// The secret half is consumed by [`EphemeralKeypair::derive_shared`],
/// so shared bits can only be computed once per keypair.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Export the public key as an uncompressed SEC1 point.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        EncodedPoint::from(self.public).as_bytes().to_vec()
    }

    /// Compute the raw shared bits with a peer's exported public key.
    ///
    /// Consumes the keypair; the ephemeral secret is dropped afterwards.
    pub fn derive_shared(self, peer_public: &[u8]) -> Result<SharedBits, CryptoError> {
        let peer = import_public_raw(peer_public)?;
        let shared = self.secret.diffie_hellman(&peer);
        let mut bits = [0u8; HASH_SIZE];
        bits.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedBits(bits))
    }
}

/// Decode an exported public key back into a curve point.
pub fn import_public_raw(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PUBLIC_KEY_SIZE;

    #[test]
    fn test_public_key_export_shape() {
        let kp = EphemeralKeypair::generate();
        let raw = kp.public_key_bytes();
        assert_eq!(raw.len(), PUBLIC_KEY_SIZE);
        assert_eq!(raw[0], 0x04); // uncompressed point marker
    }

    #[test]
    fn test_export_import_roundtrip() {
        let kp = EphemeralKeypair::generate();
        let raw = kp.public_key_bytes();
        let imported = import_public_raw(&raw).unwrap();
        assert_eq!(EncodedPoint::from(imported).as_bytes(), raw.as_slice());
    }

    #[test]
    fn test_shared_bits_agree() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();

        let alice_shared = alice.derive_shared(&bob_pub).unwrap();
        let bob_shared = bob.derive_shared(&alice_pub).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        let kp = EphemeralKeypair::generate();
        let err = kp.derive_shared(&[0u8; 65]).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKey));
    }

    #[test]
    fn test_keypairs_are_unique() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }
}
