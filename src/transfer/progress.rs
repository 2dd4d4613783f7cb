//! Live progress reporting.
//!
//! A pause-aware clock and the snapshot struct published over a watch
//! channel. Time is injected (`*_at` methods) so pause accounting is
//! testable without sleeping.

use std::time::{Duration, Instant};

use crate::journal::SessionState;

/// Wall-clock bookkeeping that excludes paused intervals.
#[derive(Debug, Clone)]
pub struct TransferClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl TransferClock {
    /// Start the clock now.
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    /// Start the clock at a given instant.
    pub fn start_at(now: Instant) -> Self {
        Self {
            started: now,
            paused_at: None,
            paused_total: Duration::ZERO,
        }
    }

    /// Freeze the elapsed counter.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    /// Freeze the elapsed counter at a given instant.
    pub fn pause_at(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Resume counting, subtracting the pause duration.
    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    /// Resume counting at a given instant.
    pub fn resume_at(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    /// Whether the clock is currently frozen.
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Active (unpaused) time since start.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    /// Active time since start, measured at a given instant.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let gross = now.saturating_duration_since(self.started);
        let paused = match self.paused_at {
            Some(paused_at) => self.paused_total + now.saturating_duration_since(paused_at),
            None => self.paused_total,
        };
        gross.saturating_sub(paused)
    }
}

/// A snapshot of transfer state for observers.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Session lifecycle state.
    pub state: SessionState,
    /// Human-comparable handshake fingerprint.
    pub fingerprint: String,
    /// Total blocks across the transfer.
    pub total_blocks: u32,
    /// Blocks verified by the receiver.
    pub completed_blocks: u32,
    /// Blocks whose last attempt failed.
    pub failed_blocks: u32,
    /// Blocks terminally skipped.
    pub skipped_blocks: u32,
    /// NACK-triggered resends so far.
    pub retransmits: u32,
    /// Total payload bytes in the transfer.
    pub bytes_total: u64,
    /// Payload bytes verified so far.
    pub bytes_completed: u64,
    /// Fraction complete, `0.0..=100.0`.
    pub percent: f64,
    /// Verified payload bytes per active second.
    pub bytes_per_sec: f64,
    /// Estimated remaining time, when the rate is meaningful.
    pub eta: Option<Duration>,
}

impl TransferProgress {
    /// An all-zero snapshot in the given state.
    pub fn idle(state: SessionState, fingerprint: String) -> Self {
        Self {
            state,
            fingerprint,
            total_blocks: 0,
            completed_blocks: 0,
            failed_blocks: 0,
            skipped_blocks: 0,
            retransmits: 0,
            bytes_total: 0,
            bytes_completed: 0,
            percent: 0.0,
            bytes_per_sec: 0.0,
            eta: None,
        }
    }

    /// Fill the derived fields (percent, rate, ETA) from the counters
    /// and the active elapsed time.
    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.percent = if self.total_blocks == 0 {
            100.0
        } else {
            self.completed_blocks as f64 / self.total_blocks as f64 * 100.0
        };

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 && self.bytes_completed > 0 {
            self.bytes_per_sec = self.bytes_completed as f64 / secs;
            let remaining = self.bytes_total.saturating_sub(self.bytes_completed);
            self.eta = Some(Duration::from_secs_f64(
                remaining as f64 / self.bytes_per_sec,
            ));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_excludes_pause() {
        let t0 = Instant::now();
        let mut clock = TransferClock::start_at(t0);

        let t1 = t0 + Duration::from_secs(10);
        clock.pause_at(t1);
        assert!(clock.is_paused());

        // Twenty paused seconds do not count.
        let t2 = t1 + Duration::from_secs(20);
        clock.resume_at(t2);
        assert!(!clock.is_paused());

        let t3 = t2 + Duration::from_secs(5);
        assert_eq!(clock.elapsed_at(t3), Duration::from_secs(15));
    }

    #[test]
    fn test_elapsed_while_paused_stays_frozen() {
        let t0 = Instant::now();
        let mut clock = TransferClock::start_at(t0);
        clock.pause_at(t0 + Duration::from_secs(3));

        let during = clock.elapsed_at(t0 + Duration::from_secs(60));
        assert_eq!(during, Duration::from_secs(3));
    }

    #[test]
    fn test_double_pause_is_idempotent() {
        let t0 = Instant::now();
        let mut clock = TransferClock::start_at(t0);
        clock.pause_at(t0 + Duration::from_secs(1));
        clock.pause_at(t0 + Duration::from_secs(2));
        clock.resume_at(t0 + Duration::from_secs(5));
        // Paused from t+1 to t+5.
        assert_eq!(
            clock.elapsed_at(t0 + Duration::from_secs(6)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_progress_percent_and_eta() {
        let progress = TransferProgress {
            total_blocks: 4,
            completed_blocks: 1,
            bytes_total: 4096,
            bytes_completed: 1024,
            ..TransferProgress::idle(SessionState::Active, "fp".into())
        }
        .finish(Duration::from_secs(2));

        assert!((progress.percent - 25.0).abs() < f64::EPSILON);
        assert!((progress.bytes_per_sec - 512.0).abs() < f64::EPSILON);
        assert_eq!(progress.eta, Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_zero_block_transfer_is_fully_complete() {
        let progress = TransferProgress::idle(SessionState::Completed, "fp".into())
            .finish(Duration::from_secs(1));
        assert!((progress.percent - 100.0).abs() < f64::EPSILON);
        assert!(progress.eta.is_none());
    }
}
