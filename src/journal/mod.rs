//! The durable journal.
//!
//! Two sled trees: `blocks` keyed by `(file_id ‖ seq)` and `sessions`
//! keyed by session id. The journal is the single source of truth for
//! transfer progress; pause, resume, and crash recovery all read from
//! here. Rows are bincode-encoded.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::block::{BlockHeader, BlockState};
use crate::core::{
    JournalError, Role, JOURNAL_RETRY_ATTEMPTS, JOURNAL_RETRY_BASE, JOURNAL_RETRY_CAP,
};

/// Tree holding block rows.
const BLOCKS_TREE: &[u8] = b"blocks";
/// Tree holding session rows.
const SESSIONS_TREE: &[u8] = b"sessions";

/// Lifecycle of a journaled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created at handshake finalization, transfer not yet started.
    Pending,
    /// Blocks are moving.
    Active,
    /// Frozen by the user; resumable.
    Paused,
    /// All blocks verified and assembled. Terminal.
    Completed,
    /// Unrecoverable failure. Terminal.
    Failed,
}

impl SessionState {
    /// Whether the session can still make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Whether a fresh handshake may adopt this session's progress.
    pub fn is_resumable(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }
}

/// A durable block row. Primary key is `(file_id, seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBlock {
    /// Owning file.
    pub file_id: Uuid,
    /// Sequence index within the file.
    pub seq: u32,
    /// Wire header as emitted or received.
    pub header: BlockHeader,
    /// Ciphertext plus tag.
    pub payload: Vec<u8>,
    /// Recovered plaintext; present only after a successful receive.
    pub decompressed: Option<Vec<u8>>,
    /// Delivery state.
    pub state: BlockState,
    /// Whether decryption, hash check, and decompression all passed.
    pub verified: bool,
}

/// A durable session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    /// Session identity from the handshake.
    pub session_id: Uuid,
    /// File being transferred.
    pub file_id: Uuid,
    /// Which side this peer plays.
    pub role: Role,
    /// Original filename.
    pub filename: String,
    /// Total file size in bytes.
    pub total_size: u64,
    /// Total block count.
    pub total_blocks: u32,
    /// Truncated hash of the session key. Never the key itself.
    pub key_fingerprint: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Reason string for `Failed` sessions.
    pub error_reason: Option<String>,
}

/// Handle over the sled database and its trees. Clones share the same
/// underlying database.
#[derive(Clone)]
pub struct Journal {
    db: sled::Db,
    blocks: sled::Tree,
    sessions: sled::Tree,
}

fn block_key(file_id: Uuid, seq: u32) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(file_id.as_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn decode_row<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, JournalError> {
    bincode::deserialize(bytes).map_err(|e| JournalError::CorruptRow(e.to_string()))
}

fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, JournalError> {
    bincode::serialize(row).map_err(|e| JournalError::CorruptRow(e.to_string()))
}

impl Journal {
    /// Open (or create) a journal at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open an in-memory journal that vanishes on drop. Test helper and
    /// opt-out for callers that do not want durability.
    pub fn temporary() -> Result<Self, JournalError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, JournalError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let sessions = db.open_tree(SESSIONS_TREE)?;
        Ok(Self { db, blocks, sessions })
    }

    /// Insert or overwrite a block row. Idempotent on `(file_id, seq)`.
    pub fn put_block(&self, block: &StoredBlock) -> Result<(), JournalError> {
        let key = block_key(block.file_id, block.seq);
        self.blocks.insert(key, encode_row(block)?)?;
        Ok(())
    }

    /// Fetch one block row.
    pub fn get_block(&self, file_id: Uuid, seq: u32) -> Result<Option<StoredBlock>, JournalError> {
        match self.blocks.get(block_key(file_id, seq))? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All block rows for a file. Key order makes this ascending by
    /// sequence, but callers re-sort rather than rely on it.
    pub fn get_blocks_for_file(&self, file_id: Uuid) -> Result<Vec<StoredBlock>, JournalError> {
        let mut rows = Vec::new();
        for entry in self.blocks.scan_prefix(file_id.as_bytes()) {
            let (_, value) = entry?;
            rows.push(decode_row(&value)?);
        }
        Ok(rows)
    }

    /// Remove every block row for a file in one atomic batch.
    pub fn delete_blocks_for_file(&self, file_id: Uuid) -> Result<(), JournalError> {
        let mut batch = sled::Batch::default();
        for entry in self.blocks.scan_prefix(file_id.as_bytes()) {
            let (key, _) = entry?;
            batch.remove(key);
        }
        self.blocks.apply_batch(batch)?;
        Ok(())
    }

    /// Insert or overwrite a session row.
    pub fn put_session(&self, session: &StoredSession) -> Result<(), JournalError> {
        self.sessions
            .insert(session.session_id.as_bytes(), encode_row(session)?)?;
        Ok(())
    }

    /// Fetch one session row.
    pub fn get_session(&self, session_id: Uuid) -> Result<Option<StoredSession>, JournalError> {
        match self.sessions.get(session_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All session rows.
    pub fn get_all_sessions(&self) -> Result<Vec<StoredSession>, JournalError> {
        let mut rows = Vec::new();
        for entry in self.sessions.iter() {
            let (_, value) = entry?;
            rows.push(decode_row(&value)?);
        }
        Ok(rows)
    }

    /// Sessions a fresh handshake may adopt (paused or active).
    pub fn resumable_sessions(&self) -> Result<Vec<StoredSession>, JournalError> {
        Ok(self
            .get_all_sessions()?
            .into_iter()
            .filter(|s| s.state.is_resumable())
            .collect())
    }

    /// Remove one session row.
    pub fn delete_session(&self, session_id: Uuid) -> Result<(), JournalError> {
        self.sessions.remove(session_id.as_bytes())?;
        Ok(())
    }

    /// Drop a file entirely: its blocks and any sessions referencing it.
    pub fn forget_file(&self, file_id: Uuid) -> Result<(), JournalError> {
        self.delete_blocks_for_file(file_id)?;
        for session in self.get_all_sessions()? {
            if session.file_id == file_id {
                self.delete_session(session.session_id)?;
            }
        }
        Ok(())
    }

    /// Wipe both trees.
    pub fn clear_all(&self) -> Result<(), JournalError> {
        self.blocks.clear()?;
        self.sessions.clear()?;
        Ok(())
    }

    /// Force buffered writes to disk.
    pub fn flush(&self) -> Result<(), JournalError> {
        self.db.flush()?;
        Ok(())
    }

    /// Flush and release the database.
    pub fn close(self) -> Result<(), JournalError> {
        self.flush()
    }
}

/// Run a journal write with exponential backoff.
///
/// Base 100 ms doubling to a 5 s cap, five attempts; exhaustion maps to
/// [`JournalError::Unavailable`], which fails the session as
/// `journal_unavailable`.
pub async fn retry_write<T, F>(mut op: F) -> Result<T, JournalError>
where
    F: FnMut() -> Result<T, JournalError>,
{
    let mut delay = JOURNAL_RETRY_BASE;
    for attempt in 1..=JOURNAL_RETRY_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == JOURNAL_RETRY_ATTEMPTS {
                    tracing::warn!(%err, attempt, "journal write failed, giving up");
                    return Err(JournalError::Unavailable {
                        attempts: JOURNAL_RETRY_ATTEMPTS,
                    });
                }
                tracing::debug!(%err, attempt, "journal write failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(JOURNAL_RETRY_CAP);
            }
        }
    }
    unreachable!("retry loop returns on the final attempt")
}
