//! SHA-256 content hashing.

use sha2::{Digest, Sha256};

use crate::core::HASH_SIZE;

/// Hash `bytes` to a 32-byte digest. Never fails.
pub fn content_hash(bytes: &[u8]) -> [u8; HASH_SIZE] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest);
    out
}

/// Hash `bytes` and return the lowercase hex form used on the wire.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    hex::encode(content_hash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            content_hash_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            content_hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_length() {
        assert_eq!(content_hash_hex(b"anything").len(), HASH_SIZE * 2);
    }
}
