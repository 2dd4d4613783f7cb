//! In-memory block records.
//!
//! The sender's working view of a block: header, ciphertext, and the
//! delivery bookkeeping that decides retransmits and terminal skips.
//! The journal row remains the durable source of truth; a record holds
//! no back-pointer, only the (file, seq) identity.

use serde::{Deserialize, Serialize};

use super::header::BlockHeader;

/// Delivery state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockState {
    /// Built and journaled, not yet queued for emission.
    Pending,
    /// In the send queue.
    Queued,
    /// Emission in progress on at least one channel.
    Sending,
    /// Verified by the receiver.
    Completed,
    /// Last delivery attempt failed; retransmit pending.
    Failed,
    /// Retransmit budget exhausted. Terminal.
    Skipped,
}

impl BlockState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, BlockState::Completed | BlockState::Skipped)
    }
}

/// A block held by the sender while delivery is in flight.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    /// Immutable wire header.
    pub header: BlockHeader,
    /// Ciphertext plus tag.
    pub payload: Vec<u8>,
    /// Delivery state.
    pub state: BlockState,
    /// Emission attempts, counting the first send.
    pub attempts: u32,
    /// Set once the payload went out on the binary channel.
    pub sent_over_binary: bool,
    /// Set once every visual chunk of the block was emitted at least once.
    pub sent_over_visual: bool,
    /// Receiver confirmed decryption, hash, and decompression.
    pub verified: bool,
    /// Most recent delivery error, if any.
    pub last_error: Option<String>,
    /// NACK-triggered resends so far.
    pub retransmits: u32,
}

impl BlockRecord {
    /// Wrap a freshly built block.
    pub fn new(header: BlockHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload,
            state: BlockState::Pending,
            attempts: 0,
            sent_over_binary: false,
            sent_over_visual: false,
            verified: false,
            last_error: None,
            retransmits: 0,
        }
    }

    /// Sequence index shorthand.
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    /// Note an emission attempt beginning.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.state = BlockState::Sending;
    }

    /// Receiver acknowledged this block.
    pub fn complete(&mut self) {
        self.state = BlockState::Completed;
        self.verified = true;
        self.last_error = None;
    }

    /// Receiver rejected this block. Returns `true` when the retransmit
    /// budget still allows another attempt, `false` once skipped.
    ///
    /// The block turns terminally skipped on exactly the
    /// `max_retransmits`-th failure.
    pub fn fail(&mut self, reason: &str, max_retransmits: u32) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.last_error = Some(reason.to_string());
        self.retransmits += 1;
        if self.retransmits >= max_retransmits {
            self.state = BlockState::Skipped;
            false
        } else {
            self.state = BlockState::Failed;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use uuid::Uuid;

    fn record() -> BlockRecord {
        let header = BlockHeader::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            0,
            1,
            16,
            8,
            Compression::None,
            &[0u8; 12],
            "00".repeat(32),
        );
        BlockRecord::new(header, vec![0u8; 16])
    }

    #[test]
    fn test_initial_state() {
        let rec = record();
        assert_eq!(rec.state, BlockState::Pending);
        assert_eq!(rec.attempts, 0);
        assert!(!rec.verified);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut rec = record();
        rec.begin_attempt();
        rec.complete();
        assert_eq!(rec.state, BlockState::Completed);
        assert!(rec.verified);
        assert!(rec.state.is_terminal());

        // A NACK arriving after completion changes nothing.
        assert!(!rec.fail("decrypt_failed", 5));
        assert_eq!(rec.state, BlockState::Completed);
    }

    #[test]
    fn test_skip_on_exactly_the_fifth_failure() {
        let mut rec = record();
        for i in 1..=4 {
            assert!(rec.fail("hash_mismatch", 5), "attempt {i} should retry");
            assert_eq!(rec.state, BlockState::Failed);
        }
        assert!(!rec.fail("hash_mismatch", 5));
        assert_eq!(rec.state, BlockState::Skipped);
        assert_eq!(rec.retransmits, 5);

        // Further failures change nothing.
        assert!(!rec.fail("hash_mismatch", 5));
        assert_eq!(rec.retransmits, 5);
    }

    #[test]
    fn test_last_error_records_reason() {
        let mut rec = record();
        rec.fail("decompress_failed", 5);
        assert_eq!(rec.last_error.as_deref(), Some("decompress_failed"));
        rec.complete();
        assert!(rec.last_error.is_none());
    }
}
