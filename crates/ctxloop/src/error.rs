//! Error types.
//!
//! Only [`LoopError`] ever leaves a loop run, and during a run the only
//! variant it can carry is [`LoopError::CollaboratorUnavailable`]. The other
//! types here are absorbed at their boundary: [`CompressionFailure`] turns
//! into a hard truncation, [`ToolError`] turns into tool-result text, and a
//! blocked approval turns into a refusal message.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`LoopError`].
pub type Result<T, E = LoopError> = std::result::Result<T, E>;

/// The external dependency a loop could not reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Model,
    CheckpointStore,
    Finalizer,
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collaborator::Model => write!(f, "model"),
            Collaborator::CheckpointStore => write!(f, "checkpoint store"),
            Collaborator::Finalizer => write!(f, "finalizer"),
        }
    }
}

/// Terminal failures of a loop invocation.
#[derive(Error, Debug)]
pub enum LoopError {
    /// A collaborator the loop cannot progress without failed. The last
    /// durable checkpoint is left as it was.
    #[error("{collaborator} unavailable: {message}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        message: String,
    },

    /// Resume was requested for a context with no checkpoint.
    #[error("no checkpoint found for context {0}")]
    NotFound(String),

    /// Configuration rejected before the loop started.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LoopError {
    pub fn model(err: impl std::fmt::Display) -> Self {
        LoopError::CollaboratorUnavailable {
            collaborator: Collaborator::Model,
            message: err.to_string(),
        }
    }

    pub fn checkpoint(err: impl std::fmt::Display) -> Self {
        LoopError::CollaboratorUnavailable {
            collaborator: Collaborator::CheckpointStore,
            message: err.to_string(),
        }
    }

    pub fn finalizer(err: impl std::fmt::Display) -> Self {
        LoopError::CollaboratorUnavailable {
            collaborator: Collaborator::Finalizer,
            message: err.to_string(),
        }
    }

    /// The collaborator that failed, if this is an availability failure.
    pub fn collaborator(&self) -> Option<Collaborator> {
        match self {
            LoopError::CollaboratorUnavailable { collaborator, .. } => Some(*collaborator),
            _ => None,
        }
    }
}

/// Invalid configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "thresholds must satisfy 0 < info < warning < critical < 1 \
         (got info={info}, warning={warning}, critical={critical})"
    )]
    Thresholds {
        info: f64,
        warning: f64,
        critical: f64,
    },

    #[error("keep_recent_ratio must be within [0, 1] (got {0})")]
    KeepRecentRatio(f64),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Why summarization could not replace the old history segment.
#[derive(Error, Debug)]
pub enum CompressionFailure {
    #[error("summarizer failed: {0}")]
    Summarizer(String),

    #[error("summarizer returned an empty summary")]
    EmptySummary,

    #[error("summary does not shrink history enough ({summary_tokens} vs {old_tokens} tokens)")]
    InsufficientReduction {
        old_tokens: usize,
        summary_tokens: usize,
    },
}

/// Failures from a [`ModelClient`](crate::api::ModelClient) call.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("model API HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("model API error: {0}")]
    Api(String),

    #[error("failed to parse model response: {0}")]
    Parse(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Request(_) => true,
            ModelError::Http { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            ModelError::Api(msg) => crate::api::retry::is_transient_error(msg),
            ModelError::Parse(_) => false,
        }
    }
}

/// Failures from executing a single tool call. Rendered into the
/// `ToolResult` text the model sees; never propagated.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("{0}")]
    Failed(String),
}

/// Failures of a [`CheckpointStore`](crate::agent::checkpoint::CheckpointStore).
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("checkpoint serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_unavailable_names_the_collaborator() {
        let err = LoopError::model("connection refused");
        assert_eq!(err.collaborator(), Some(Collaborator::Model));
        assert_eq!(err.to_string(), "model unavailable: connection refused");

        let err = LoopError::checkpoint("disk full");
        assert!(err.to_string().starts_with("checkpoint store unavailable"));
    }

    #[test]
    fn model_error_transience() {
        assert!(ModelError::Http { status: 429, body: String::new() }.is_transient());
        assert!(ModelError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!ModelError::Http { status: 401, body: String::new() }.is_transient());
        assert!(ModelError::Request("timed out".into()).is_transient());
        assert!(!ModelError::Parse("eof".into()).is_transient());
    }

    #[test]
    fn not_found_has_no_collaborator() {
        assert_eq!(LoopError::NotFound("ctx".into()).collaborator(), None);
    }
}
