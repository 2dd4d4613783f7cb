//! The transfer engine.
//!
//! Sender and receiver pipelines over the dual channel, the send queue
//! and received-block tracker, NACK/ACK control, visual-frame pacing,
//! pause/resume/stop, and the terminal assembly step. Both pipelines
//! run as a single cooperative task each; the journal and every state
//! transition stay serialized on that task.

pub mod assembly;
pub mod control;
pub mod engine;
pub mod manifest;
pub mod progress;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod tracker;

pub use assembly::assemble_file;
pub use control::{ControlMessage, NackReason, VisualFrame};
pub use engine::{
    completed_sequences, find_resumable_session, run_receiver_handshake, run_sender_handshake,
    EngineCommand, EngineHandle,
};
pub use manifest::Manifest;
pub use progress::{TransferClock, TransferProgress};
pub use queue::{NackOutcome, SendQueue};
pub use receiver::{ReceivedFile, ReceiverEngine};
pub use sender::{OutboundFile, SenderEngine, SenderReport};
pub use tracker::BlockTracker;

use tokio::sync::mpsc;

use crate::core::TransferError;
use crate::transport::{BinaryAdapter, VisualAdapter};

/// Await the next command unless the handle went away.
pub(crate) async fn recv_command(
    closed: bool,
    rx: &mut mpsc::Receiver<EngineCommand>,
) -> Option<EngineCommand> {
    if closed {
        std::future::pending().await
    } else {
        rx.recv().await
    }
}

/// Await the next visual frame unless that side already closed.
pub(crate) async fn recv_visual(
    closed: bool,
    visual: &mut Box<dyn VisualAdapter>,
) -> Option<Vec<u8>> {
    if closed {
        std::future::pending().await
    } else {
        visual.recv_frame().await
    }
}

/// Await the next binary message; parks forever without an adapter.
pub(crate) async fn recv_binary(binary: &mut Option<Box<dyn BinaryAdapter>>) -> Option<Vec<u8>> {
    match binary {
        Some(adapter) => adapter.recv_binary().await,
        None => std::future::pending().await,
    }
}

pub(crate) fn frame_err(err: impl std::fmt::Display) -> TransferError {
    TransferError::Frame(err.to_string())
}
