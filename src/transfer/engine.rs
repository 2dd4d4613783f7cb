//! Engine plumbing shared by both pipelines.
//!
//! The command/progress handle, the visual handshake drivers, and the
//! journal scans that decide whether a fresh key may adopt persisted
//! progress.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::control::VisualFrame;
use super::progress::TransferProgress;
use crate::block::BlockState;
use crate::core::{HandshakeError, JournalError, ProtocolConfig, Role};
use crate::handshake::{
    FinalizedSession, ReceiverHandshake, RequestedOptions, SenderHandshake,
};
use crate::journal::{Journal, StoredSession};
use crate::transport::VisualAdapter;

/// Commands a caller can send a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Freeze emission and the elapsed clock at the next suspension point.
    Pause,
    /// Continue after a pause.
    Resume,
    /// End the transfer; completed if every block is done, failed otherwise.
    Stop,
}

/// Caller-side handle onto a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    progress: watch::Receiver<TransferProgress>,
}

impl EngineHandle {
    /// Ask the engine to pause. A no-op once the engine finished.
    pub async fn pause(&self) {
        let _ = self.commands.send(EngineCommand::Pause).await;
    }

    /// Ask the engine to resume.
    pub async fn resume(&self) {
        let _ = self.commands.send(EngineCommand::Resume).await;
    }

    /// Ask the engine to stop.
    pub async fn stop(&self) {
        let _ = self.commands.send(EngineCommand::Stop).await;
    }

    /// Watch live progress snapshots.
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.clone()
    }
}

/// Build the command/progress pair an engine shares with its handle.
pub(crate) fn engine_channel(
    initial: TransferProgress,
) -> (
    mpsc::Receiver<EngineCommand>,
    watch::Sender<TransferProgress>,
    EngineHandle,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (progress_tx, progress_rx) = watch::channel(initial);
    let handle = EngineHandle {
        commands: cmd_tx,
        progress: progress_rx,
    };
    (cmd_rx, progress_tx, handle)
}

fn encode_frame(frame: &VisualFrame) -> Result<Vec<u8>, HandshakeError> {
    frame
        .to_bytes()
        .map_err(|e| HandshakeError::Transport(format!("frame encode: {e}")))
}

/// Drive the sender handshake over the visual channel.
///
/// The offer frame repeats every hold interval until the receiver's ack
/// arrives; the whole exchange is capped by the handshake timeout.
pub async fn run_sender_handshake(
    visual: &mut dyn VisualAdapter,
    config: &ProtocolConfig,
) -> Result<FinalizedSession, HandshakeError> {
    let mut machine = SenderHandshake::new();
    let offer = machine.start(vec![config.block_size as u32])?;
    let offer_bytes = encode_frame(&VisualFrame::Handshake(offer))?;

    let exchange = async {
        loop {
            visual
                .send_frame(offer_bytes.clone())
                .await
                .map_err(|e| HandshakeError::Transport(e.to_string()))?;

            match tokio::time::timeout(config.visual_hold, visual.recv_frame()).await {
                Ok(Some(bytes)) => {
                    if let Ok(VisualFrame::Handshake(frame)) = VisualFrame::from_bytes(&bytes) {
                        if frame.role == Role::Receiver {
                            return machine.finalize(&frame);
                        }
                    }
                    // Anything else during the handshake is noise.
                }
                Ok(None) => {
                    return Err(HandshakeError::Transport("visual channel closed".into()))
                }
                Err(_) => {} // hold elapsed, re-emit the offer
            }
        }
    };

    match tokio::time::timeout(config.handshake_timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

/// Drive the receiver handshake: scan for an offer, answer it.
pub async fn run_receiver_handshake(
    visual: &mut dyn VisualAdapter,
    options: RequestedOptions,
    config: &ProtocolConfig,
) -> Result<FinalizedSession, HandshakeError> {
    let mut machine = ReceiverHandshake::new(options);

    let exchange = async {
        loop {
            match visual.recv_frame().await {
                Some(bytes) => {
                    let frame = match VisualFrame::from_bytes(&bytes) {
                        Ok(VisualFrame::Handshake(frame)) if frame.role == Role::Sender => frame,
                        _ => continue,
                    };
                    let (ack, session) = machine.respond(&frame)?;
                    let ack_bytes = encode_frame(&VisualFrame::Handshake(ack))?;
                    visual
                        .send_frame(ack_bytes)
                        .await
                        .map_err(|e| HandshakeError::Transport(e.to_string()))?;
                    return Ok(session);
                }
                None => return Err(HandshakeError::Transport("visual channel closed".into())),
            }
        }
    };

    match tokio::time::timeout(config.handshake_timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

/// Find a paused or active session whose persisted fingerprint matches a
/// freshly derived key. `None` means the transfer starts from scratch.
pub fn find_resumable_session(
    journal: &Journal,
    key_fingerprint: &str,
) -> Result<Option<StoredSession>, JournalError> {
    Ok(journal
        .resumable_sessions()?
        .into_iter()
        .find(|s| s.key_fingerprint == key_fingerprint))
}

/// Sequences the journal already shows verified for a file.
pub fn completed_sequences(
    journal: &Journal,
    file_id: Uuid,
) -> Result<BTreeSet<u32>, JournalError> {
    Ok(journal
        .get_blocks_for_file(file_id)?
        .into_iter()
        .filter(|row| row.state == BlockState::Completed && row.verified)
        .map(|row| row.seq)
        .collect())
}
