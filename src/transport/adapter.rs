//! Transport adapters.
//!
//! The engine never touches a camera or a data channel directly. It
//! borrows two object-safe seams: a visual adapter moving byte frames
//! with a fixed per-frame capacity, and an optional binary adapter
//! moving ordered messages with a `buffered_amount` backpressure signal.
//! The channel-backed implementations below wire two engines together
//! in-process for tests and loopback transfers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::TransferError;

/// A byte-frame-in/byte-frame-out channel (realized by QR + camera).
#[async_trait]
pub trait VisualAdapter: Send + Sync {
    /// Display one frame. The engine enforces the hold time.
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransferError>;

    /// Next scanned frame, or `None` once the channel is closed.
    async fn recv_frame(&mut self) -> Option<Vec<u8>>;

    /// Release the channel.
    async fn close(&mut self);
}

/// An ordered, reliable binary channel (realized by a data channel).
#[async_trait]
pub trait BinaryAdapter: Send + Sync {
    /// Queue one binary message.
    async fn send_binary(&mut self, message: Vec<u8>) -> Result<(), TransferError>;

    /// Next inbound message, or `None` once the channel is closed.
    async fn recv_binary(&mut self) -> Option<Vec<u8>>;

    /// Bytes queued but not yet flushed by the underlying transport.
    fn buffered_amount(&self) -> u64;

    /// Release the channel.
    async fn close(&mut self);
}

/// In-process visual adapter over tokio channels.
pub struct ChannelVisualAdapter {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelVisualAdapter {
    /// Build a cross-wired adapter pair.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl VisualAdapter for ChannelVisualAdapter {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransferError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransferError::TransportClosed)
    }

    async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// In-process binary adapter over tokio channels.
///
/// The buffered amount is a shared counter so tests can simulate a
/// saturated data channel from the outside.
pub struct ChannelBinaryAdapter {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    buffered: Arc<AtomicU64>,
}

impl ChannelBinaryAdapter {
    /// Build a cross-wired adapter pair.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: a_tx,
                rx: a_rx,
                buffered: Arc::new(AtomicU64::new(0)),
            },
            Self {
                tx: b_tx,
                rx: b_rx,
                buffered: Arc::new(AtomicU64::new(0)),
            },
        )
    }

    /// Handle for steering the reported buffered amount from a test.
    pub fn backpressure_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.buffered)
    }
}

#[async_trait]
impl BinaryAdapter for ChannelBinaryAdapter {
    async fn send_binary(&mut self, message: Vec<u8>) -> Result<(), TransferError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransferError::TransportClosed)
    }

    async fn recv_binary(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    fn buffered_amount(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_visual_pair_moves_frames_both_ways() {
        let (mut left, mut right) = ChannelVisualAdapter::pair(8);

        left.send_frame(b"frame-a".to_vec()).await.unwrap();
        assert_eq!(right.recv_frame().await.unwrap(), b"frame-a");

        right.send_frame(b"frame-b".to_vec()).await.unwrap();
        assert_eq!(left.recv_frame().await.unwrap(), b"frame-b");
    }

    #[tokio::test]
    async fn test_binary_pair_and_backpressure_signal() {
        let (mut left, mut right) = ChannelBinaryAdapter::pair(8);
        assert_eq!(left.buffered_amount(), 0);

        let handle = left.backpressure_handle();
        handle.store(2_000_000, Ordering::Relaxed);
        assert_eq!(left.buffered_amount(), 2_000_000);

        left.send_binary(vec![1, 2, 3]).await.unwrap();
        assert_eq!(right.recv_binary().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_reports_closed() {
        let (mut left, right) = ChannelVisualAdapter::pair(1);
        drop(right);
        let err = left.send_frame(b"orphan".to_vec()).await.unwrap_err();
        assert!(matches!(err, TransferError::TransportClosed));
    }
}
