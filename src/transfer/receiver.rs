//! The receiver pipeline.
//!
//! Consumes frames from both channels, recovers each block (open, hash
//! compare, decompress), journals the plaintext before anything is
//! acknowledged, and answers with acks and NACKs. Once a file's
//! manifest is present and its sequence range is densely verified, the
//! journal rows are assembled and validated against the manifest.
//!
//! Binary framing follows the announcement protocol: an announcement
//! names the block, and the very next binary message is its ciphertext.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::assembly::assemble_file;
use super::control::{ControlMessage, NackReason, VisualFrame};
use super::engine::{completed_sequences, engine_channel, EngineCommand, EngineHandle};
use super::manifest::Manifest;
use super::progress::{TransferClock, TransferProgress};
use super::tracker::BlockTracker;
use super::{frame_err, recv_binary, recv_command, recv_visual};
use crate::block::{decode_block_wire, recover_block, BlockHeader, BlockState};
use crate::core::{ProtocolConfig, Role, TransferError};
use crate::handshake::FinalizedSession;
use crate::journal::{retry_write, Journal, SessionState, StoredBlock, StoredSession};
use crate::transport::{BinaryAdapter, ChunkReassembler, VisualAdapter};

/// One fully verified file surfaced to the caller.
#[derive(Debug)]
pub struct ReceivedFile {
    /// The validated manifest.
    pub manifest: Manifest,
    /// The reassembled contents.
    pub data: Vec<u8>,
}

struct FileProgress {
    session_id: Uuid,
    tracker: BlockTracker,
    manifest: Option<Manifest>,
    last_progress: Instant,
    bytes_completed: u64,
}

enum Event {
    Tick,
    Command(Option<EngineCommand>),
    Visual(Option<Vec<u8>>),
    Binary(Option<Vec<u8>>),
}

/// Verifies, journals, and reassembles inbound files.
pub struct ReceiverEngine {
    config: ProtocolConfig,
    journal: Journal,
    session: FinalizedSession,
    visual: Box<dyn VisualAdapter>,
    binary: Option<Box<dyn BinaryAdapter>>,
    commands: mpsc::Receiver<EngineCommand>,
    progress: watch::Sender<TransferProgress>,
    clock: TransferClock,
    reassembler: ChunkReassembler,
    files: HashMap<Uuid, FileProgress>,
    /// Header from the last announcement; the next binary message is
    /// that block's payload.
    pending_payload: Option<BlockHeader>,
    completed: Vec<ReceivedFile>,
    stop_requested: bool,
    commands_closed: bool,
    visual_in_closed: bool,
}

impl ReceiverEngine {
    /// Wire up a receiver over a finalized session and its adapters.
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
            reassembler: ChunkReassembler::new(),
            files: HashMap::new(),
            pending_payload: None,
            completed: Vec::new(),
            stop_requested: false,
            commands_closed: false,
            visual_in_closed: false,
        };
        (engine, handle)
    }

    /// Receive until `expected_files` files assembled and verified, the
    /// caller stops the engine, or every inbound channel closes.
    pub async fn run(mut self, expected_files: usize) -> Result<Vec<ReceivedFile>, TransferError> {
        let tick = (self.config.block_timeout / 4).max(Duration::from_millis(50));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.completed.len() < expected_files && !self.stop_requested {
            if self.visual_in_closed && self.binary.is_none() {
                tracing::warn!("every inbound channel closed before completion");
                self.fail_open_sessions("transport closed").await;
                return Err(TransferError::TransportClosed);
            }

            let event = tokio::select! {
                _ = ticker.tick() => Event::Tick,
                cmd = recv_command(self.commands_closed, &mut self.commands) => {
                    Event::Command(cmd)
                }
                frame = recv_visual(self.visual_in_closed, &mut self.visual) => {
                    Event::Visual(frame)
                }
                msg = recv_binary(&mut self.binary) => Event::Binary(msg),
            };
            match event {
                Event::Tick => self.check_timeouts().await?,
                Event::Command(cmd) => self.apply_command(cmd).await?,
                Event::Visual(None) => self.visual_in_closed = true,
                Event::Visual(Some(bytes)) => self.on_visual_frame(&bytes).await?,
                Event::Binary(None) => {
                    tracing::warn!("binary channel closed, visual continues");
                    self.binary = None;
                    self.pending_payload = None;
                }
                Event::Binary(Some(bytes)) => self.on_binary_message(bytes).await?,
            }
        }

        self.publish();
        self.shutdown().await;
        Ok(std::mem::take(&mut self.completed))
    }

    async fn on_visual_frame(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let frame = match VisualFrame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%err, "unreadable visual frame dropped");
                return Ok(());
            }
        };
        match frame {
            // Repeated offers after finalization are noise.
            VisualFrame::Handshake(_) => Ok(()),
            VisualFrame::Control { message } => self.on_control(message).await,
            VisualFrame::Chunk(chunk) => {
                let identity = (chunk.file_id, chunk.block_id, chunk.seq);
                match self.reassembler.insert(&chunk) {
                    Ok(None) => Ok(()),
                    Ok(Some(wire)) => match decode_block_wire(&wire) {
                        Ok((header, payload)) => self.handle_block(header, payload).await,
                        Err(err) => {
                            tracing::warn!(%err, "reassembled block wire undecodable");
                            self.send_nack(
                                identity.0,
                                identity.1,
                                identity.2,
                                NackReason::DecryptFailed,
                            )
                            .await
                        }
                    },
                    Err(err) => {
                        tracing::warn!(%err, "visual chunk rejected");
                        self.reassembler.forget(identity.1);
                        self.send_nack(
                            identity.0,
                            identity.1,
                            identity.2,
                            NackReason::MissingChunk,
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn on_binary_message(&mut self, bytes: Vec<u8>) -> Result<(), TransferError> {
        // An announcement promises that the next message is the payload.
        if let Some(header) = self.pending_payload.take() {
            return self.handle_block(header, bytes).await;
        }
        match ControlMessage::from_bytes(&bytes) {
            Ok(ControlMessage::BlockAnnouncement { header, .. }) => {
                self.pending_payload = Some(header);
                Ok(())
            }
            Ok(message) => self.on_control(message).await,
            Err(err) => {
                tracing::debug!(%err, "unannounced binary message dropped");
                Ok(())
            }
        }
    }

    async fn on_control(&mut self, message: ControlMessage) -> Result<(), TransferError> {
        match message {
            ControlMessage::Manifest { manifest } => self.on_manifest(manifest).await,
            ControlMessage::Heartbeat { .. } => {
                self.touch_all_files();
                Ok(())
            }
            // Announcements only make sense on the binary channel, and
            // acks/NACKs are sender-bound.
            _ => Ok(()),
        }
    }

    async fn on_manifest(&mut self, manifest: Manifest) -> Result<(), TransferError> {
        tracing::info!(file_id = %manifest.file_id, blocks = manifest.total_blocks, "manifest received");
        self.ensure_file(manifest.file_id, manifest.total_blocks).await?;

        if let Some(file) = self.files.get_mut(&manifest.file_id) {
            file.manifest = Some(manifest.clone());
        }
        self.update_session_from_manifest(&manifest).await?;
        self.try_assemble(manifest.file_id).await
    }

    /// The whole receive path for one delivered block, from either
    /// channel: verify, persist, acknowledge.
    async fn handle_block(
        &mut self,
        header: BlockHeader,
        payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        let file_id = header.file_id;
        let seq = header.seq;
        let block_id = header.block_id;

        self.ensure_file(file_id, header.total_seq).await?;

        let duplicate = self
            .files
            .get(&file_id)
            .is_some_and(|f| f.tracker.is_completed(seq));
        if duplicate {
            // Replays collapse here; re-ack so the sender converges.
            tracing::debug!(seq, "duplicate delivery re-acknowledged");
            return self.send_ack(seq, block_id).await;
        }

        match recover_block(&self.session.key, &header, &payload) {
            Err(err) => {
                let reason = NackReason::from(&err);
                tracing::warn!(seq, reason = reason.as_str(), %err, "block rejected");
                let row = StoredBlock {
                    file_id,
                    seq,
                    header,
                    payload,
                    decompressed: None,
                    state: BlockState::Failed,
                    verified: false,
                };
                retry_write(|| self.journal.put_block(&row)).await?;
                if let Some(file) = self.files.get_mut(&file_id) {
                    file.tracker.mark_rejected();
                }
                self.send_nack(file_id, block_id, seq, reason).await?;
                self.publish();
                Ok(())
            }
            Ok(plain) => {
                let plain_len = plain.len() as u64;
                let row = StoredBlock {
                    file_id,
                    seq,
                    header,
                    payload,
                    decompressed: Some(plain),
                    state: BlockState::Completed,
                    verified: true,
                };
                // The plaintext is durable before the tracker or the
                // sender hear anything about completion.
                retry_write(|| self.journal.put_block(&row)).await?;
                if let Some(file) = self.files.get_mut(&file_id) {
                    file.tracker.mark_completed(seq);
                    file.last_progress = Instant::now();
                    file.bytes_completed += plain_len;
                }
                tracing::debug!(seq, "block verified and journaled");
                self.send_ack(seq, block_id).await?;
                self.publish();
                self.try_assemble(file_id).await
            }
        }
    }

    async fn try_assemble(&mut self, file_id: Uuid) -> Result<(), TransferError> {
        let ready = self
            .files
            .get(&file_id)
            .is_some_and(|f| f.manifest.is_some() && f.tracker.is_complete());
        if !ready {
            return Ok(());
        }
        let (manifest, session_id) = match self.files.get(&file_id) {
            Some(file) => match &file.manifest {
                Some(manifest) => (manifest.clone(), file.session_id),
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        match assemble_file(&self.journal, file_id, &manifest) {
            Ok(data) => {
                self.finish_session(session_id, &manifest, SessionState::Completed, None)
                    .await?;
                self.completed.push(ReceivedFile { manifest, data });
                self.publish();
                Ok(())
            }
            Err(err) => {
                let reason = match &err {
                    TransferError::ManifestMismatch { .. } => "manifest_mismatch",
                    TransferError::MissingBlocks { .. } => "missing_blocks",
                    _ => "assembly_failed",
                };
                tracing::error!(%file_id, reason, "assembly failed");
                self.finish_session(
                    session_id,
                    &manifest,
                    SessionState::Failed,
                    Some(reason.to_string()),
                )
                .await?;
                self.publish();
                Err(err)
            }
        }
    }

    /// Stalled files NACK their lowest missing sequence once per
    /// timeout window.
    async fn check_timeouts(&mut self) -> Result<(), TransferError> {
        let now = Instant::now();
        let timeout = self.config.block_timeout;
        let mut stalled = Vec::new();
        for (file_id, file) in &mut self.files {
            if file.tracker.is_complete() {
                continue;
            }
            if now.duration_since(file.last_progress) < timeout {
                continue;
            }
            if let Some(seq) = file.tracker.first_missing() {
                stalled.push((*file_id, seq));
                file.last_progress = now;
            }
        }
        for (file_id, seq) in stalled {
            // A failed row may know the block id; a never-seen block
            // gets the nil id.
            let block_id = self
                .journal
                .get_block(file_id, seq)
                .ok()
                .flatten()
                .map(|row| row.header.block_id)
                .unwrap_or_else(Uuid::nil);
            tracing::debug!(%file_id, seq, "block stalled, requesting retransmit");
            self.send_nack(file_id, block_id, seq, NackReason::MissingChunk)
                .await?;
        }
        Ok(())
    }

    async fn apply_command(&mut self, cmd: Option<EngineCommand>) -> Result<(), TransferError> {
        match cmd {
            None => self.commands_closed = true,
            Some(EngineCommand::Stop) => self.stop_requested = true,
            Some(EngineCommand::Resume) => {}
            Some(EngineCommand::Pause) => {
                tracing::info!("receive paused");
                self.clock.pause();
                self.set_open_sessions_state(SessionState::Paused).await?;
                self.publish();
                loop {
                    match self.commands.recv().await {
                        Some(EngineCommand::Resume) => {
                            tracing::info!("receive resumed");
                            self.clock.resume();
                            self.set_open_sessions_state(SessionState::Active).await?;
                            self.touch_all_files();
                            self.publish();
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

    /// Create the tracker and session row the first time a file shows
    /// up, adopting any sequences the journal already shows verified.
    async fn ensure_file(&mut self, file_id: Uuid, total_seq: u32) -> Result<(), TransferError> {
        if self.files.contains_key(&file_id) {
            return Ok(());
        }

        let mut tracker = BlockTracker::new(file_id, total_seq);
        let adopted = completed_sequences(&self.journal, file_id)?;
        for seq in &adopted {
            tracker.mark_completed(*seq);
        }
        if !adopted.is_empty() {
            tracing::info!(%file_id, adopted = adopted.len(), "journaled progress adopted");
        }

        let session_id = if self.files.is_empty() {
            self.session.session_id
        } else {
            Uuid::new_v4()
        };
        let row = StoredSession {
            session_id,
            file_id,
            role: Role::Receiver,
            filename: String::new(),
            total_size: 0,
            total_blocks: total_seq,
            key_fingerprint: self.session.key.fingerprint(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            state: SessionState::Active,
            error_reason: None,
        };
        retry_write(|| self.journal.put_session(&row)).await?;

        self.files.insert(
            file_id,
            FileProgress {
                session_id,
                tracker,
                manifest: None,
                last_progress: Instant::now(),
                bytes_completed: 0,
            },
        );
        Ok(())
    }

    async fn update_session_from_manifest(
        &self,
        manifest: &Manifest,
    ) -> Result<(), TransferError> {
        let session_id = match self.files.get(&manifest.file_id) {
            Some(file) => file.session_id,
            None => return Ok(()),
        };
        if let Some(mut row) = retry_write(|| self.journal.get_session(session_id)).await? {
            row.filename = manifest.filename.clone();
            row.total_size = manifest.total_size;
            row.total_blocks = manifest.total_blocks;
            row.updated_at = Utc::now();
            retry_write(|| self.journal.put_session(&row)).await?;
        }
        Ok(())
    }

    async fn finish_session(
        &self,
        session_id: Uuid,
        manifest: &Manifest,
        state: SessionState,
        error_reason: Option<String>,
    ) -> Result<(), TransferError> {
        if let Some(mut row) = retry_write(|| self.journal.get_session(session_id)).await? {
            row.filename = manifest.filename.clone();
            row.total_size = manifest.total_size;
            row.state = state;
            row.error_reason = error_reason;
            row.updated_at = Utc::now();
            retry_write(|| self.journal.put_session(&row)).await?;
        }
        Ok(())
    }

    async fn set_open_sessions_state(&self, state: SessionState) -> Result<(), TransferError> {
        for file in self.files.values() {
            if file.tracker.is_complete() {
                continue;
            }
            if let Some(mut row) = retry_write(|| self.journal.get_session(file.session_id)).await?
            {
                row.state = state;
                row.updated_at = Utc::now();
                retry_write(|| self.journal.put_session(&row)).await?;
            }
        }
        Ok(())
    }

    async fn fail_open_sessions(&self, reason: &str) {
        for file in self.files.values() {
            if file.tracker.is_complete() {
                continue;
            }
            if let Ok(Some(mut row)) = self.journal.get_session(file.session_id) {
                row.state = SessionState::Failed;
                row.error_reason = Some(reason.to_string());
                row.updated_at = Utc::now();
                let _ = self.journal.put_session(&row);
            }
        }
    }

    fn touch_all_files(&mut self) {
        let now = Instant::now();
        for file in self.files.values_mut() {
            file.last_progress = now;
        }
    }

    async fn send_ack(&mut self, sequence: u32, block_id: Uuid) -> Result<(), TransferError> {
        self.send_control(ControlMessage::Ack { sequence, block_id })
            .await
    }

    async fn send_nack(
        &mut self,
        file_id: Uuid,
        block_id: Uuid,
        sequence: u32,
        reason: NackReason,
    ) -> Result<(), TransferError> {
        self.send_control(ControlMessage::Nack {
            file_id,
            block_id,
            sequence,
            reason,
        })
        .await
    }

    /// Control goes out on the binary channel when present, else as a
    /// visual control frame. Send failures are not fatal on their own;
    /// the run loop notices once every channel is gone.
    async fn send_control(&mut self, message: ControlMessage) -> Result<(), TransferError> {
        if let Some(binary) = self.binary.as_mut() {
            let bytes = message.to_bytes().map_err(frame_err)?;
            match binary.send_binary(bytes).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(%err, "binary control failed, using visual");
                    self.binary = None;
                    self.pending_payload = None;
                }
            }
        }
        let bytes = VisualFrame::Control { message }.to_bytes().map_err(frame_err)?;
        if let Err(err) = self.visual.send_frame(bytes).await {
            tracing::warn!(%err, "control frame lost, no channel available");
        }
        Ok(())
    }

    fn publish(&self) {
        let state = if self.clock.is_paused() {
            SessionState::Paused
        } else if !self.files.is_empty()
            && self.files.values().all(|f| f.tracker.is_complete())
        {
            SessionState::Completed
        } else {
            SessionState::Active
        };
        let snapshot = TransferProgress {
            state,
            fingerprint: self.session.fingerprint.clone(),
            total_blocks: self.files.values().map(|f| f.tracker.total_seq()).sum(),
            completed_blocks: self
                .files
                .values()
                .map(|f| f.tracker.completed_count())
                .sum(),
            failed_blocks: 0,
            skipped_blocks: 0,
            retransmits: self.files.values().map(|f| f.tracker.reject_count()).sum(),
            bytes_total: self
                .files
                .values()
                .filter_map(|f| f.manifest.as_ref())
                .map(|m| m.total_size)
                .sum(),
            bytes_completed: self.files.values().map(|f| f.bytes_completed).sum(),
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
