//! Checkpoint and resume for loop runs.
//!
//! The controller records a [`Checkpoint`] at every phase boundary, keyed by
//! `context_id`. After a crash, [`LoopController::resume`](super::controller::LoopController::resume)
//! loads the latest one and continues at the phase it names.
//!
//! [`MemoryCheckpointStore`] keeps checkpoints in process memory; durable
//! on-disk storage is [`FileCheckpointStore`](super::session::FileCheckpointStore).

use super::controller::LoopPhase;
use super::state::ConversationState;
use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Serializable snapshot of one conversation at a phase boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Monotonic per-context save counter.
    pub sequence: u64,
    /// The phase the loop enters next.
    pub next_phase: LoopPhase,
    pub saved_at: DateTime<Utc>,
    pub state: ConversationState,
}

impl Checkpoint {
    pub fn new(sequence: u64, next_phase: LoopPhase, state: ConversationState) -> Self {
        Self {
            sequence,
            next_phase,
            saved_at: Utc::now(),
            state,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.state.context_id
    }
}

/// Durable storage for checkpoints.
///
/// `save` must leave the previously saved checkpoint readable if it fails.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, context_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// The latest checkpoint for `context_id`, or `None` if there is none.
    fn load(&self, context_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Sequence number of the latest checkpoint for `context_id`.
    fn latest_sequence(&self, context_id: &str) -> Result<Option<u64>, CheckpointError> {
        Ok(self.load(context_id)?.map(|c| c.sequence))
    }

    /// Delete all but the newest `keep_last` checkpoints. Returns the number
    /// deleted. Stores that keep only the latest have nothing to do.
    fn cleanup(&self, _context_id: &str, _keep_last: usize) -> Result<usize, CheckpointError> {
        Ok(0)
    }
}

/// In-process checkpoint store. Keeps only the latest checkpoint per context.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts with a stored checkpoint.
    pub fn len(&self) -> usize {
        self.checkpoints.lock().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, context_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut map = self
            .checkpoints
            .lock()
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))?;
        map.insert(context_id.to_string(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, context_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let map = self
            .checkpoints
            .lock()
            .map_err(|e| CheckpointError::Unavailable(e.to_string()))?;
        Ok(map.get(context_id).cloned())
    }
}
