//! The canonical block: header plus encrypted payload.
//!
//! Also defines the flat wire form `(header ‖ payload)` used when a whole
//! block travels as one byte buffer (visual chunking splits this buffer).

pub mod header;
pub mod pipeline;
pub mod record;

pub use header::{BlockHeader, HeaderError};
pub use pipeline::{build_block, chunk_spans, recover_block, RecoverError, SealedBlock};
pub use record::{BlockRecord, BlockState};

/// Bytes of the big-endian header-length prefix.
pub const BLOCK_WIRE_PREFIX: usize = 4;

/// Flatten a block into `len(header_json) ‖ header_json ‖ payload`.
pub fn encode_block_wire(header: &BlockHeader, payload: &[u8]) -> Result<Vec<u8>, HeaderError> {
    let header_json = header.to_json()?;
    let mut buf = Vec::with_capacity(BLOCK_WIRE_PREFIX + header_json.len() + payload.len());
    buf.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a flat block buffer back into header and payload.
pub fn decode_block_wire(data: &[u8]) -> Result<(BlockHeader, Vec<u8>), HeaderError> {
    if data.len() < BLOCK_WIRE_PREFIX {
        return Err(HeaderError::TooShort {
            expected: BLOCK_WIRE_PREFIX,
            actual: data.len(),
        });
    }
    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body_start = BLOCK_WIRE_PREFIX + header_len;
    if data.len() < body_start {
        return Err(HeaderError::TooShort {
            expected: body_start,
            actual: data.len(),
        });
    }
    let header = BlockHeader::from_json(&data[BLOCK_WIRE_PREFIX..body_start])?;
    Ok((header, data[body_start..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SessionKey;
    use uuid::Uuid;

    #[test]
    fn test_block_wire_roundtrip() {
        let key = SessionKey::from_bytes([0x33; 32]);
        let sealed = build_block(&key, Uuid::new_v4(), 1, 4, b"wire me").unwrap();

        let wire = encode_block_wire(&sealed.header, &sealed.payload).unwrap();
        let (header, payload) = decode_block_wire(&wire).unwrap();
        assert_eq!(header, sealed.header);
        assert_eq!(payload, sealed.payload);
    }

    #[test]
    fn test_truncated_wire_rejected() {
        let key = SessionKey::from_bytes([0x33; 32]);
        let sealed = build_block(&key, Uuid::new_v4(), 0, 1, b"wire me").unwrap();
        let wire = encode_block_wire(&sealed.header, &sealed.payload).unwrap();

        assert!(matches!(
            decode_block_wire(&wire[..2]),
            Err(HeaderError::TooShort { .. })
        ));
        assert!(matches!(
            decode_block_wire(&wire[..BLOCK_WIRE_PREFIX + 5]),
            Err(HeaderError::TooShort { .. })
        ));
    }

    #[test]
    fn test_empty_payload_wire() {
        let key = SessionKey::from_bytes([0x33; 32]);
        let sealed = build_block(&key, Uuid::new_v4(), 0, 1, b"").unwrap();
        let wire = encode_block_wire(&sealed.header, &sealed.payload).unwrap();
        let (_, payload) = decode_block_wire(&wire).unwrap();
        assert_eq!(payload, sealed.payload);
    }
}
