//! Configuration for a [`LoopController`](super::controller::LoopController) run.
//!
//! Every knob has a default, so `LoopConfig::default()` is a working setup.
//! Override specific settings with the `with_*` builder methods or struct
//! update syntax, or load a partial JSON file with [`LoopConfig::load_json`]
//! (missing fields keep their defaults).
//!
//! # Examples
//!
//! ```ignore
//! let config = LoopConfig::default()
//!     .with_max_loop_count(20)
//!     .with_context_window(128_000)
//!     .with_checkpointing(false);
//! ```
//!
//! Disabling the subagent continuation turn:
//!
//! ```ignore
//! let config = LoopConfig {
//!     subagent: SubagentConfig {
//!         continuation: Toggle::disabled(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! ```

use crate::context::DEFAULT_CHARS_PER_TOKEN;
use crate::context::usage::{CompressionThresholds, DEFAULT_CONTEXT_WINDOW};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for optional behaviour.
///
/// When `enabled` is `false` the behaviour is skipped regardless of the
/// inner config value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle<T: Default> {
    /// Whether this behaviour is active.
    pub enabled: bool,
    /// Behaviour-specific configuration.
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// An enabled instance carrying `config`.
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }

    /// A disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// The inner config, if enabled.
    pub fn get(&self) -> Option<&T> {
        self.enabled.then_some(&self.config)
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Prompts ───────────────────────────────────────────────────────

/// Asked of the model when the loop stopped before it gave a final answer.
pub const DEFAULT_FINALIZE_PROMPT: &str = "\
You have reached the maximum number of steps for this task and cannot call \
any more tools. Using only the information already gathered above, give the \
best final answer you can. State clearly what was completed, what was not, \
and any open problems.";

/// Sent to a subagent whose final answer is too short to be useful.
pub const DEFAULT_CONTINUATION_PROMPT: &str = "\
Your previous reply is too brief for the delegating agent to act on. Write a \
complete report of what you did and found: key results, file paths and \
identifiers involved, and anything left unresolved.";

// ── Subagent config ───────────────────────────────────────────────

/// Settings for [`SubagentIsolator`](super::sub_agent::SubagentIsolator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentConfig {
    /// Loop ceiling for a delegated task when the caller does not give one.
    pub max_loop_count: u32,
    /// Final answers shorter than this (in chars) get one continuation turn.
    pub min_result_chars: usize,
    /// Maximum nesting of subagents below the root conversation.
    pub max_depth: u32,
    /// The continuation turn and its prompt.
    pub continuation: Toggle<String>,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_loop_count: 8,
            min_result_chars: 200,
            max_depth: 2,
            continuation: Toggle::enabled(DEFAULT_CONTINUATION_PROMPT.to_string()),
        }
    }
}

// ── Main loop config ──────────────────────────────────────────────

/// Configuration for one loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Hard ceiling on `Act` steps before the loop is forced to finalize.
    pub max_loop_count: u32,
    /// Context window of the active model, in tokens.
    pub context_window_tokens: usize,
    /// Usage levels and compression retention.
    pub thresholds: CompressionThresholds,
    /// Per summarizer call limit. `None` disables the timeout.
    pub summarizer_timeout_secs: Option<u64>,
    /// Save a checkpoint at every phase boundary (when a store is attached).
    pub checkpointing: bool,
    /// After a successful `Finalize`, keep only this many newest checkpoints.
    pub cleanup_on_success: Toggle<usize>,
    /// Prompt for the best-effort answer after a forced stop.
    pub finalize_prompt: String,
    /// Chars-per-token ratio for local estimates.
    pub chars_per_token: f64,
    pub subagent: SubagentConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loop_count: 10,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW,
            thresholds: CompressionThresholds::default(),
            summarizer_timeout_secs: Some(120),
            checkpointing: true,
            cleanup_on_success: Toggle::enabled(1),
            finalize_prompt: DEFAULT_FINALIZE_PROMPT.to_string(),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            subagent: SubagentConfig::default(),
        }
    }
}

impl LoopConfig {
    // ── Builder methods ───────────────────────────────────────────

    pub fn with_max_loop_count(mut self, max_loop_count: u32) -> Self {
        self.max_loop_count = max_loop_count;
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn with_thresholds(mut self, thresholds: CompressionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_summarizer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.summarizer_timeout_secs = timeout.map(|d| d.as_secs());
        self
    }

    pub fn with_checkpointing(mut self, enabled: bool) -> Self {
        self.checkpointing = enabled;
        self
    }

    pub fn with_cleanup_on_success(mut self, cleanup: Toggle<usize>) -> Self {
        self.cleanup_on_success = cleanup;
        self
    }

    pub fn with_finalize_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.finalize_prompt = prompt.into();
        self
    }

    pub fn with_subagent(mut self, subagent: SubagentConfig) -> Self {
        self.subagent = subagent;
        self
    }

    pub fn summarizer_timeout(&self) -> Option<Duration> {
        self.summarizer_timeout_secs.map(Duration::from_secs)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if self.context_window_tokens == 0 {
            return Err(ConfigError::Zero {
                field: "context_window_tokens",
            });
        }
        if self.chars_per_token <= 0.0 {
            return Err(ConfigError::Zero {
                field: "chars_per_token",
            });
        }
        if self.subagent.max_loop_count == 0 {
            return Err(ConfigError::Zero {
                field: "subagent.max_loop_count",
            });
        }
        Ok(())
    }

    /// Load a (possibly partial) JSON config file and validate it.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
