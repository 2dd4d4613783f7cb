//! Engine configuration.
//!
//! Every timeout and threshold the engine consults lives here, with the
//! protocol defaults. Construct with `ProtocolConfig::default()` and
//! override fields as needed.

use std::time::Duration;

use super::constants::{
    DEFAULT_BINARY_WATERMARK, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RETRANSMITS,
    DEFAULT_VISUAL_FRAME_CAPACITY, DEFAULT_VISUAL_HOLD, DEFAULT_VISUAL_SAFETY_FACTOR,
};

/// Tunable engine options.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Bytes per chunk before the codec runs.
    pub block_size: usize,

    /// Maximum bytes per visual frame.
    pub visual_frame_capacity: usize,

    /// Effective capacity = `visual_frame_capacity * visual_safety_factor`.
    pub visual_safety_factor: f64,

    /// Minimum display time per visual frame.
    pub visual_hold: Duration,

    /// Binary channel backpressure threshold in buffered bytes.
    pub binary_watermark: u64,

    /// Retransmit attempts before a block becomes terminally skipped.
    pub max_retransmits_per_block: u32,

    /// Idle cap on the handshake exchange.
    pub handshake_timeout: Duration,

    /// Receiver inactivity window per block before a NACK is emitted.
    pub block_timeout: Duration,

    /// Liveness heartbeat interval on the binary channel.
    pub heartbeat_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            visual_frame_capacity: DEFAULT_VISUAL_FRAME_CAPACITY,
            visual_safety_factor: DEFAULT_VISUAL_SAFETY_FACTOR,
            visual_hold: DEFAULT_VISUAL_HOLD,
            binary_watermark: DEFAULT_BINARY_WATERMARK,
            max_retransmits_per_block: DEFAULT_MAX_RETRANSMITS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl ProtocolConfig {
    /// Usable bytes per visual frame after the safety factor.
    pub fn effective_frame_capacity(&self) -> usize {
        let effective = (self.visual_frame_capacity as f64 * self.visual_safety_factor) as usize;
        effective.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = ProtocolConfig::default();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.visual_frame_capacity, 2953);
        assert_eq!(config.binary_watermark, 1024 * 1024);
        assert_eq!(config.max_retransmits_per_block, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(60));
        assert_eq!(config.block_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_effective_frame_capacity() {
        let config = ProtocolConfig::default();
        assert_eq!(config.effective_frame_capacity(), 1771);

        let tiny = ProtocolConfig {
            visual_frame_capacity: 1,
            visual_safety_factor: 0.1,
            ..ProtocolConfig::default()
        };
        // Never rounds down to zero.
        assert_eq!(tiny.effective_frame_capacity(), 1);
    }
}
