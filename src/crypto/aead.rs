//! AES-256-GCM sealing and opening.
//!
//! Every seal draws a fresh random 96-bit nonce; the nonce travels in
//! the block header, the tag rides appended to the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use super::kdf::SessionKey;
use crate::core::{CryptoError, AEAD_NONCE_SIZE};

/// Encrypt `plaintext`, returning `(ciphertext ‖ tag, nonce)`.
pub fn seal(plaintext: &[u8], key: &SessionKey) -> Result<(Vec<u8>, [u8; AEAD_NONCE_SIZE]), CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::EncryptionFailed)?;

    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok((ciphertext, nonce))
}

/// Decrypt and authenticate `ciphertext ‖ tag`.
///
/// Fails with [`CryptoError::DecryptionFailed`] on any tag mismatch,
/// which the receiver surfaces as a `decrypt_failed` NACK.
pub fn open(ciphertext: &[u8], key: &SessionKey, nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != AEAD_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: AEAD_NONCE_SIZE,
            actual: nonce.len(),
        });
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::DecryptionFailed)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AEAD_TAG_SIZE;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes([0x07; 32])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let plaintext = b"authenticated block payload";
        let (ciphertext, nonce) = seal(plaintext, &key).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + AEAD_TAG_SIZE);

        let opened = open(&ciphertext, &key, &nonce).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = test_key();
        let (_, n1) = seal(b"same input", &key).unwrap();
        let (_, n2) = seal(b"same input", &key).unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_bit_flip_fails_authentication() {
        let key = test_key();
        let (mut ciphertext, nonce) = seal(b"authenticated payload", &key).unwrap();
        ciphertext[0] ^= 0x01;

        let err = open(&ciphertext, &key, &nonce).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_key_fails() {
        let (ciphertext, nonce) = seal(b"secret", &test_key()).unwrap();
        let other = SessionKey::from_bytes([0x08; 32]);
        assert!(open(&ciphertext, &other, &nonce).is_err());
    }

    #[test]
    fn test_bad_nonce_length_rejected() {
        let key = test_key();
        let (ciphertext, _) = seal(b"secret", &key).unwrap();
        let err = open(&ciphertext, &key, &[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidNonceLength { expected: 12, actual: 8 }
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let (ciphertext, nonce) = seal(b"", &key).unwrap();
        assert_eq!(ciphertext.len(), AEAD_TAG_SIZE);
        assert_eq!(open(&ciphertext, &key, &nonce).unwrap(), Vec::<u8>::new());
    }
}
