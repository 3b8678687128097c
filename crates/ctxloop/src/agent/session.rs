//! On-disk checkpoint storage with per-context directories and manifests.
//!
//! Each conversation (root or subagent) gets its own directory named after
//! its `context_id`, holding a lightweight `manifest.json` and numbered
//! checkpoint files. Every file is written to a temp file and renamed into
//! place, so a failed save never clobbers the last good checkpoint.

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::controller::LoopPhase;
use crate::error::CheckpointError;
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ── Manifest ───────────────────────────────────────────────────────

/// Lightweight metadata for a context, stored as `manifest.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContextManifest {
    /// Context id (also the directory name).
    pub context_id: String,
    pub parent_context_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number of the newest checkpoint file.
    pub last_sequence: u64,
    pub next_phase: LoopPhase,
    pub loop_count: u32,
    pub message_count: usize,
    pub lifetime_prompt_tokens: u64,
    pub lifetime_completion_tokens: u64,
    /// First ~200 chars of the first human message.
    pub message_preview: String,
}

impl ContextManifest {
    fn from_checkpoint(checkpoint: &Checkpoint, created_at: DateTime<Utc>) -> Self {
        let state = &checkpoint.state;
        Self {
            context_id: state.context_id.clone(),
            parent_context_id: state.parent_context_id.clone(),
            created_at,
            updated_at: checkpoint.saved_at,
            last_sequence: checkpoint.sequence,
            next_phase: checkpoint.next_phase,
            loop_count: state.loop_count,
            message_count: state.messages.len(),
            lifetime_prompt_tokens: state.usage.lifetime_prompt_tokens,
            lifetime_completion_tokens: state.usage.lifetime_completion_tokens,
            message_preview: extract_message_preview(&state.messages),
        }
    }

    /// Whether the stored run already reached `Finalize`.
    pub fn is_finished(&self) -> bool {
        self.next_phase == LoopPhase::Finalize
    }
}

// ── FileCheckpointStore ────────────────────────────────────────────

/// [`CheckpointStore`] backed by a directory tree.
///
/// Directory layout:
/// ```text
/// root/
///   ctx-3f2a.../
///     manifest.json
///     checkpoint-001.json
///     checkpoint-002.json
/// ```
pub struct FileCheckpointStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomic write: serialize to a temp file, then rename into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    let json = std::fs::read_to_string(path).map_err(io_err(path))?;
    Ok(serde_json::from_str(&json)?)
}

impl FileCheckpointStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn context_dir(&self, context_id: &str) -> PathBuf {
        self.root.join(context_id)
    }

    fn manifest_path(&self, context_id: &str) -> PathBuf {
        self.context_dir(context_id).join("manifest.json")
    }

    /// Checkpoint filename for a given sequence number (zero-padded).
    fn checkpoint_filename(sequence: u64) -> String {
        format!("checkpoint-{sequence:03}.json")
    }

    fn parse_sequence(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix("checkpoint-")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse().ok())
    }

    /// Checkpoint files for a context, sorted by sequence.
    fn checkpoint_files(&self, context_id: &str) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
        let dir = self.context_dir(context_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_sequence(&name) {
                files.push((seq, entry.path()));
            }
        }
        files.sort_by_key(|(seq, _)| *seq);
        Ok(files)
    }

    /// Load a context's manifest. Returns `None` if the context doesn't exist.
    pub fn load_manifest(&self, context_id: &str) -> Result<Option<ContextManifest>, CheckpointError> {
        let path = self.manifest_path(context_id);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Manifests of every stored context. Unreadable manifests are skipped.
    pub fn list_contexts(&self) -> Result<Vec<ContextManifest>, CheckpointError> {
        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                continue;
            }
            let path = entry.path().join("manifest.json");
            if !path.exists() {
                continue;
            }
            match read_json::<ContextManifest>(&path) {
                Ok(m) => manifests.push(m),
                Err(e) => warn!("Skipping unreadable manifest at {}: {e}", path.display()),
            }
        }
        manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(manifests)
    }

    /// Delete a context directory (manifest + all checkpoints).
    pub fn delete_context(&self, context_id: &str) -> Result<(), CheckpointError> {
        let dir = self.context_dir(context_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, context_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let dir = self.context_dir(context_id);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let path = dir.join(Self::checkpoint_filename(checkpoint.sequence));
        write_json_atomic(&path, checkpoint)?;

        let created_at = self
            .load_manifest(context_id)
            .ok()
            .flatten()
            .map_or(checkpoint.saved_at, |m| m.created_at);
        let manifest = ContextManifest::from_checkpoint(checkpoint, created_at);
        write_json_atomic(&self.manifest_path(context_id), &manifest)?;

        debug!("Checkpoint saved: {}", path.display());
        Ok(())
    }

    fn load(&self, context_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.checkpoint_files(context_id)?.last() {
            Some((_, path)) => read_json(path).map(Some),
            None => Ok(None),
        }
    }

    fn latest_sequence(&self, context_id: &str) -> Result<Option<u64>, CheckpointError> {
        Ok(self.checkpoint_files(context_id)?.last().map(|(seq, _)| *seq))
    }

    fn cleanup(&self, context_id: &str, keep_last: usize) -> Result<usize, CheckpointError> {
        let files = self.checkpoint_files(context_id)?;
        let excess = files.len().saturating_sub(keep_last);
        for (_, path) in files.iter().take(excess) {
            std::fs::remove_file(path).map_err(io_err(path))?;
        }
        if excess > 0 {
            debug!("Removed {excess} old checkpoint(s) for {context_id}");
        }
        Ok(excess)
    }
}

// ── Helper ─────────────────────────────────────────────────────────

/// Extract the first ~200 characters of the first human message.
pub fn extract_message_preview(messages: &[Message]) -> String {
    messages
        .iter()
        .find_map(|m| match m {
            Message::Human { content, .. } => Some(content.chars().take(200).collect()),
            _ => None,
        })
        .unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────
