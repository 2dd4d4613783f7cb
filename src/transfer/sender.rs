//! The sender pipeline.
//!
//! Chunks each file through the block pipeline, journals every block,
//! then emits in ascending order over both channels: the binary path
//! (announcement, then payload) whenever the buffered amount is under
//! the watermark, and the visual path always, holding each frame for the
//! configured time. Inbound acks and NACKs interleave at every
//! suspension point; the loop ends when every block is completed or
//! skipped, and the manifest goes out last.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::control::{ControlMessage, VisualFrame};
use super::engine::{completed_sequences, engine_channel, EngineCommand, EngineHandle};
use super::manifest::Manifest;
use super::progress::{TransferClock, TransferProgress};
use super::queue::{NackOutcome, SendQueue};
use super::{frame_err, recv_binary, recv_command, recv_visual};
use crate::block::{build_block, chunk_spans, encode_block_wire, BlockRecord, BlockState};
use crate::core::{ProtocolConfig, Role, TransferError};
use crate::handshake::FinalizedSession;
use crate::journal::{retry_write, Journal, SessionState, StoredBlock, StoredSession};
use crate::transport::{split_block, BinaryAdapter, VisualAdapter};

/// One finite file handed to the sender.
pub struct OutboundFile {
    /// Name carried in the session row and the manifest.
    pub filename: String,
    /// Full contents.
    pub data: Vec<u8>,
}

/// What a finished sender run produced.
#[derive(Debug, Default)]
pub struct SenderReport {
    /// One manifest per file, in send order.
    pub manifests: Vec<Manifest>,
    /// Blocks verified by the receiver.
    pub completed_blocks: u32,
    /// Blocks that exhausted their retransmit budget.
    pub skipped_blocks: u32,
    /// NACK-triggered resends across the run.
    pub retransmits: u32,
}

struct FileOutcome {
    manifest: Manifest,
    completed: u32,
    skipped: u32,
    retransmits: u32,
}

enum PumpEvent {
    HoldElapsed,
    Command(Option<EngineCommand>),
    Visual(Option<Vec<u8>>),
    Binary(Option<Vec<u8>>),
}

/// Drives one or more files out over the dual channel.
pub struct SenderEngine {
    config: ProtocolConfig,
    journal: Journal,
    session: FinalizedSession,
    visual: Box<dyn VisualAdapter>,
    binary: Option<Box<dyn BinaryAdapter>>,
    commands: mpsc::Receiver<EngineCommand>,
    progress: watch::Sender<TransferProgress>,
    clock: TransferClock,
    last_heartbeat: Instant,
    stop_requested: bool,
    commands_closed: bool,
    visual_in_closed: bool,
}

impl SenderEngine {
    /// Wire up a sender over a finalized session and its adapters.
    pub fn new(
        config: ProtocolConfig,
        journal: Journal,
        session: FinalizedSession,
        visual: Box<dyn VisualAdapter>,
        binary: Option<Box<dyn BinaryAdapter>>,
    ) -> (Self, EngineHandle) {
        let initial =
            TransferProgress::idle(SessionState::Pending, session.fingerprint.clone());
        let (commands, progress, handle) = engine_channel(initial);
        let engine = Self {
            config,
            journal,
            session,
            visual,
            binary,
            commands,
            progress,
            clock: TransferClock::start(),
            last_heartbeat: Instant::now(),
            stop_requested: false,
            commands_closed: false,
            visual_in_closed: false,
        };
        (engine, handle)
    }

    /// Transfer each file in turn. The handshake's session id names the
    /// first file's session; later files get fresh ids under the same key.
    pub async fn run(mut self, files: Vec<OutboundFile>) -> Result<SenderReport, TransferError> {
        let mut report = SenderReport::default();
        for (index, file) in files.iter().enumerate() {
            if self.stop_requested {
                break;
            }
            let session_id = if index == 0 {
                self.session.session_id
            } else {
                Uuid::new_v4()
            };
            let outcome = self
                .guarded_transfer(session_id, Uuid::new_v4(), file, BTreeSet::new())
                .await?;
            merge(&mut report, outcome);
        }
        self.shutdown().await;
        Ok(report)
    }

    /// Resume a journaled session. Progress is adopted only when the
    /// fresh key's fingerprint matches the persisted one; otherwise the
    /// transfer starts over as a new session.
    pub async fn resume(
        mut self,
        stored: StoredSession,
        file: OutboundFile,
    ) -> Result<SenderReport, TransferError> {
        let fingerprint = self.session.key.fingerprint();
        let (session_id, file_id, adopt) = if stored.key_fingerprint == fingerprint {
            let adopt = completed_sequences(&self.journal, stored.file_id)?;
            tracing::info!(
                session_id = %stored.session_id,
                adopted = adopt.len(),
                "fingerprint matches, adopting journaled progress"
            );
            (stored.session_id, stored.file_id, adopt)
        } else {
            tracing::info!("fingerprint differs, treating the session as new");
            (Uuid::new_v4(), Uuid::new_v4(), BTreeSet::new())
        };

        let outcome = self
            .guarded_transfer(session_id, file_id, &file, adopt)
            .await?;
        let mut report = SenderReport::default();
        merge(&mut report, outcome);
        self.shutdown().await;
        Ok(report)
    }

    async fn guarded_transfer(
        &mut self,
        session_id: Uuid,
        file_id: Uuid,
        file: &OutboundFile,
        adopt: BTreeSet<u32>,
    ) -> Result<FileOutcome, TransferError> {
        match self.transfer_file(session_id, file_id, file, adopt).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail_session_best_effort(session_id, &err);
                Err(err)
            }
        }
    }

    async fn transfer_file(
        &mut self,
        session_id: Uuid,
        file_id: Uuid,
        file: &OutboundFile,
        adopt: BTreeSet<u32>,
    ) -> Result<FileOutcome, TransferError> {
        let spans = chunk_spans(file.data.len(), self.config.block_size);
        let total = spans.len() as u32;
        let manifest = Manifest::for_file(file_id, &file.filename, &file.data, total);

        let mut records = Vec::with_capacity(spans.len());
        for (seq, span) in spans.into_iter().enumerate() {
            let seq = seq as u32;
            // Reuse journaled blocks on resume so block identities and
            // nonces stay stable across restarts.
            let record = match self.journal.get_block(file_id, seq)? {
                Some(row) => {
                    let mut record = BlockRecord::new(row.header, row.payload);
                    if row.state == BlockState::Completed && row.verified {
                        record.complete();
                    }
                    record
                }
                None => {
                    let sealed =
                        build_block(&self.session.key, file_id, seq, total, &file.data[span])?;
                    let row = StoredBlock {
                        file_id,
                        seq,
                        header: sealed.header.clone(),
                        payload: sealed.payload.clone(),
                        decompressed: None,
                        state: BlockState::Pending,
                        verified: false,
                    };
                    retry_write(|| self.journal.put_block(&row)).await?;
                    BlockRecord::new(sealed.header, sealed.payload)
                }
            };
            records.push(record);
        }

        let mut queue = SendQueue::new(records, self.config.max_retransmits_per_block);
        queue.adopt_completed(&adopt);

        let mut session_row = StoredSession {
            session_id,
            file_id,
            role: Role::Sender,
            filename: file.filename.clone(),
            total_size: file.data.len() as u64,
            total_blocks: total,
            key_fingerprint: self.session.key.fingerprint(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            state: SessionState::Active,
            error_reason: None,
        };
        self.put_session(&session_row).await?;
        self.publish(&queue, &session_row);

        tracing::info!(
            %file_id,
            blocks = total,
            bytes = file.data.len(),
            "sending file"
        );

        while !queue.is_drained() && !self.stop_requested {
            let Some(seq) = queue.next_to_send() else { break };
            self.emit_block(&mut queue, &mut session_row, seq).await?;
        }

        if !self.stop_requested {
            self.send_manifest(&manifest).await?;
        }

        let all_done = queue.all_completed();
        session_row.state = if all_done {
            SessionState::Completed
        } else {
            SessionState::Failed
        };
        session_row.error_reason = if all_done {
            None
        } else if self.stop_requested {
            Some("stopped".to_string())
        } else {
            Some(format!("{} blocks skipped", queue.skipped_count()))
        };
        session_row.updated_at = Utc::now();
        self.put_session(&session_row).await?;
        self.publish(&queue, &session_row);

        Ok(FileOutcome {
            manifest,
            completed: queue.completed_count(),
            skipped: queue.skipped_count(),
            retransmits: queue.retransmit_total(),
        })
    }

    /// One emission round for a block: binary leg when the channel has
    /// headroom, visual leg always, pumping inbound during each hold.
    async fn emit_block(
        &mut self,
        queue: &mut SendQueue,
        session_row: &mut StoredSession,
        seq: u32,
    ) -> Result<(), TransferError> {
        queue.begin_attempt(seq);
        let (header, payload, binary_pending) = {
            let record = queue
                .record(seq)
                .ok_or_else(|| frame_err("unknown sequence in queue"))?;
            (
                record.header.clone(),
                record.payload.clone(),
                !record.sent_over_binary,
            )
        };
        let file_id = session_row.file_id;
        self.update_block_row(file_id, seq, BlockState::Sending, false)
            .await?;

        if binary_pending {
            if let Some(binary) = self.binary.as_mut() {
                if binary.buffered_amount() <= self.config.binary_watermark {
                    let announce = ControlMessage::announce(&header);
                    match send_announced_payload(binary, &announce, &payload).await {
                        Ok(()) => queue.mark_binary_sent(seq),
                        Err(err) => {
                            tracing::warn!(%err, "binary send failed, falling back to visual");
                            self.binary = None;
                        }
                    }
                } else {
                    tracing::debug!(seq, "binary channel saturated, visual continues");
                }
            }
        }

        let wire = encode_block_wire(&header, &payload).map_err(frame_err)?;
        let chunks = split_block(&header, &wire, self.config.effective_frame_capacity());
        for chunk in chunks {
            let bytes = VisualFrame::Chunk(chunk).to_bytes().map_err(frame_err)?;
            if let Err(err) = self.visual.send_frame(bytes).await {
                if self.binary.is_some() {
                    tracing::warn!(%err, "visual send failed, binary continues");
                    break;
                }
                return Err(err);
            }
            self.pump(self.config.visual_hold, queue, session_row).await?;
            if self.stop_requested {
                return Ok(());
            }
            // An ack can land mid-emission; stop spending frames on it.
            if queue
                .record(seq)
                .is_some_and(|r| r.state.is_terminal())
            {
                break;
            }
        }
        queue.mark_visual_sent(seq);
        Ok(())
    }

    /// Wait out `hold` while absorbing commands and inbound control.
    async fn pump(
        &mut self,
        hold: Duration,
        queue: &mut SendQueue,
        session_row: &mut StoredSession,
    ) -> Result<(), TransferError> {
        let deadline = tokio::time::sleep(hold);
        tokio::pin!(deadline);
        loop {
            let event = tokio::select! {
                () = &mut deadline => PumpEvent::HoldElapsed,
                cmd = recv_command(self.commands_closed, &mut self.commands) => {
                    PumpEvent::Command(cmd)
                }
                frame = recv_visual(self.visual_in_closed, &mut self.visual) => {
                    PumpEvent::Visual(frame)
                }
                msg = recv_binary(&mut self.binary) => PumpEvent::Binary(msg),
            };
            match event {
                PumpEvent::HoldElapsed => break,
                PumpEvent::Command(cmd) => {
                    self.apply_command(cmd, queue, session_row).await?;
                }
                PumpEvent::Visual(None) => {
                    self.visual_in_closed = true;
                }
                PumpEvent::Visual(Some(bytes)) => {
                    if let Ok(VisualFrame::Control { message }) = VisualFrame::from_bytes(&bytes)
                    {
                        self.on_control(message, queue, session_row).await?;
                    }
                }
                PumpEvent::Binary(None) => {
                    tracing::warn!("binary channel closed, visual continues");
                    self.binary = None;
                }
                PumpEvent::Binary(Some(bytes)) => {
                    if let Ok(message) = ControlMessage::from_bytes(&bytes) {
                        self.on_control(message, queue, session_row).await?;
                    }
                }
            }
            if self.stop_requested {
                break;
            }
            self.maybe_heartbeat().await;
        }
        Ok(())
    }

    async fn on_control(
        &mut self,
        message: ControlMessage,
        queue: &mut SendQueue,
        session_row: &mut StoredSession,
    ) -> Result<(), TransferError> {
        let file_id = session_row.file_id;
        match message {
            ControlMessage::Ack { sequence, block_id } => {
                if queue.handle_ack(sequence, block_id) {
                    tracing::debug!(seq = sequence, "block acknowledged");
                    self.update_block_row(file_id, sequence, BlockState::Completed, true)
                        .await?;
                    self.publish(queue, session_row);
                }
            }
            ControlMessage::Nack {
                sequence, reason, ..
            } => {
                match queue.handle_nack(sequence, reason.as_str()) {
                    NackOutcome::Retry => {
                        tracing::debug!(
                            seq = sequence,
                            reason = reason.as_str(),
                            "retransmit scheduled"
                        );
                        self.update_block_row(file_id, sequence, BlockState::Failed, false)
                            .await?;
                    }
                    NackOutcome::Skipped => {
                        tracing::warn!(seq = sequence, "retransmit budget exhausted, skipping");
                        self.update_block_row(file_id, sequence, BlockState::Skipped, false)
                            .await?;
                    }
                    NackOutcome::Ignored => {}
                }
                self.publish(queue, session_row);
            }
            // Announcements, manifests, and heartbeats are receiver-bound.
            _ => {}
        }
        Ok(())
    }

    async fn apply_command(
        &mut self,
        cmd: Option<EngineCommand>,
        queue: &mut SendQueue,
        session_row: &mut StoredSession,
    ) -> Result<(), TransferError> {
        match cmd {
            None => self.commands_closed = true,
            Some(EngineCommand::Stop) => self.stop_requested = true,
            Some(EngineCommand::Resume) => {}
            Some(EngineCommand::Pause) => {
                tracing::info!(session_id = %session_row.session_id, "transfer paused");
                self.clock.pause();
                session_row.state = SessionState::Paused;
                session_row.updated_at = Utc::now();
                self.put_session(session_row).await?;
                self.publish(queue, session_row);

                // Nothing is emitted until the user decides.
                loop {
                    match self.commands.recv().await {
                        Some(EngineCommand::Resume) => {
                            tracing::info!(session_id = %session_row.session_id, "transfer resumed");
                            self.clock.resume();
                            session_row.state = SessionState::Active;
                            session_row.updated_at = Utc::now();
                            self.put_session(session_row).await?;
                            self.publish(queue, session_row);
                            break;
                        }
                        Some(EngineCommand::Pause) => {}
                        Some(EngineCommand::Stop) | None => {
                            self.stop_requested = true;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn maybe_heartbeat(&mut self) {
        if self.last_heartbeat.elapsed() < self.config.heartbeat_interval {
            return;
        }
        self.last_heartbeat = Instant::now();
        if let Some(binary) = self.binary.as_mut() {
            let beat = ControlMessage::Heartbeat {
                timestamp: Utc::now(),
            };
            if let Ok(bytes) = beat.to_bytes() {
                let _ = binary.send_binary(bytes).await;
            }
        }
    }

    async fn send_manifest(&mut self, manifest: &Manifest) -> Result<(), TransferError> {
        let message = ControlMessage::Manifest {
            manifest: manifest.clone(),
        };
        if let Some(binary) = self.binary.as_mut() {
            let bytes = message.to_bytes().map_err(frame_err)?;
            match binary.send_binary(bytes).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(%err, "manifest over binary failed, using visual");
                    self.binary = None;
                }
            }
        }
        let bytes = VisualFrame::Control { message }.to_bytes().map_err(frame_err)?;
        self.visual.send_frame(bytes).await
    }

    async fn update_block_row(
        &self,
        file_id: Uuid,
        seq: u32,
        state: BlockState,
        verified: bool,
    ) -> Result<(), TransferError> {
        if let Some(mut row) = retry_write(|| self.journal.get_block(file_id, seq)).await? {
            row.state = state;
            row.verified = verified;
            retry_write(|| self.journal.put_block(&row)).await?;
        }
        Ok(())
    }

    async fn put_session(&self, row: &StoredSession) -> Result<(), TransferError> {
        retry_write(|| self.journal.put_session(row)).await?;
        Ok(())
    }

    fn fail_session_best_effort(&self, session_id: Uuid, err: &TransferError) {
        let reason = match err {
            TransferError::Journal(_) => "journal_unavailable".to_string(),
            other => other.to_string(),
        };
        if let Ok(Some(mut row)) = self.journal.get_session(session_id) {
            row.state = SessionState::Failed;
            row.error_reason = Some(reason);
            row.updated_at = Utc::now();
            let _ = self.journal.put_session(&row);
        }
    }

    fn publish(&self, queue: &SendQueue, session_row: &StoredSession) {
        let snapshot = TransferProgress {
            state: session_row.state,
            fingerprint: self.session.fingerprint.clone(),
            total_blocks: queue.len() as u32,
            completed_blocks: queue.completed_count(),
            failed_blocks: queue.failed_count(),
            skipped_blocks: queue.skipped_count(),
            retransmits: queue.retransmit_total(),
            bytes_total: queue.bytes_total(),
            bytes_completed: queue.bytes_completed(),
            percent: 0.0,
            bytes_per_sec: 0.0,
            eta: None,
        }
        .finish(self.clock.elapsed());
        self.progress.send_replace(snapshot);
    }

    async fn shutdown(&mut self) {
        self.visual.close().await;
        if let Some(binary) = self.binary.as_mut() {
            binary.close().await;
        }
    }
}

/// The binary channel strictly serializes announcement, then payload;
/// the next announcement never starts before the previous payload went
/// out.
async fn send_announced_payload(
    binary: &mut Box<dyn BinaryAdapter>,
    announce: &ControlMessage,
    payload: &[u8],
) -> Result<(), TransferError> {
    let bytes = announce.to_bytes().map_err(frame_err)?;
    binary.send_binary(bytes).await?;
    binary.send_binary(payload.to_vec()).await?;
    Ok(())
}

fn merge(report: &mut SenderReport, outcome: FileOutcome) {
    report.manifests.push(outcome.manifest);
    report.completed_blocks += outcome.completed;
    report.skipped_blocks += outcome.skipped;
    report.retransmits += outcome.retransmits;
}
