//! Token usage tracking and severity classification.
//!
//! The loop records the token counts reported by every model invocation in a
//! [`TokenUsageTracker`]. [`TokenUsageTracker::classify`] maps the ratio of
//! cumulative prompt tokens to the context window onto a [`UsageLevel`] using
//! the configured [`CompressionThresholds`]. Classification is stateless: the
//! same counters always give the same level, with no hysteresis.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Thresholds and retention knobs shared by the tracker and the compressor.
///
/// `info < warning < critical`, all strictly inside `(0, 1)`. Check with
/// [`validate`](Self::validate) before use; [`LoopConfig`](crate::agent::config::LoopConfig)
/// does so when a loop is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionThresholds {
    pub info: f64,
    pub warning: f64,
    pub critical: f64,
    /// Minimum number of recent messages kept verbatim by compression.
    pub keep_recent_messages: usize,
    /// Fraction of the context window kept verbatim by compression.
    pub keep_recent_ratio: f64,
    /// Lower bound (in tokens) on the ratio-derived recent window.
    pub keep_recent_window_floor: usize,
    /// Below this many messages compression is a no-op.
    pub min_messages_to_compress: usize,
    /// Message ceiling for the non-LLM fallback.
    pub max_history_messages: usize,
}

impl Default for CompressionThresholds {
    fn default() -> Self {
        Self {
            info: 0.60,
            warning: 0.80,
            critical: 0.95,
            keep_recent_messages: 10,
            keep_recent_ratio: 0.10,
            keep_recent_window_floor: 2_000,
            min_messages_to_compress: 15,
            max_history_messages: 40,
        }
    }
}

impl CompressionThresholds {
    /// Set the three severity thresholds at once.
    pub fn with_levels(mut self, info: f64, warning: f64, critical: f64) -> Self {
        self.info = info;
        self.warning = warning;
        self.critical = critical;
        self
    }

    pub fn with_keep_recent_messages(mut self, n: usize) -> Self {
        self.keep_recent_messages = n;
        self
    }

    pub fn with_keep_recent_ratio(mut self, ratio: f64) -> Self {
        self.keep_recent_ratio = ratio;
        self
    }

    pub fn with_keep_recent_window_floor(mut self, tokens: usize) -> Self {
        self.keep_recent_window_floor = tokens;
        self
    }

    pub fn with_min_messages_to_compress(mut self, n: usize) -> Self {
        self.min_messages_to_compress = n;
        self
    }

    pub fn with_max_history_messages(mut self, n: usize) -> Self {
        self.max_history_messages = n;
        self
    }

    /// Reject out-of-range or non-increasing thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 < self.info
            && self.info < self.warning
            && self.warning < self.critical
            && self.critical < 1.0;
        if !ordered {
            return Err(ConfigError::Thresholds {
                info: self.info,
                warning: self.warning,
                critical: self.critical,
            });
        }
        if !(0.0..=1.0).contains(&self.keep_recent_ratio) {
            return Err(ConfigError::KeepRecentRatio(self.keep_recent_ratio));
        }
        if self.max_history_messages == 0 {
            return Err(ConfigError::Zero {
                field: "max_history_messages",
            });
        }
        Ok(())
    }
}

/// Four-level severity of context usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Normal,
    Info,
    Warning,
    Critical,
}

impl UsageLevel {
    /// Highest threshold reached wins; below `info` is `Normal`.
    pub fn from_ratio(ratio: f64, thresholds: &CompressionThresholds) -> Self {
        if ratio >= thresholds.critical {
            UsageLevel::Critical
        } else if ratio >= thresholds.warning {
            UsageLevel::Warning
        } else if ratio >= thresholds.info {
            UsageLevel::Info
        } else {
            UsageLevel::Normal
        }
    }
}

impl std::fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageLevel::Normal => write!(f, "normal"),
            UsageLevel::Info => write!(f, "info"),
            UsageLevel::Warning => write!(f, "warning"),
            UsageLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Per-conversation token counters.
///
/// `cumulative_*` are the figures classification runs on. Compression
/// rebases the prompt counter to the size of the compressed history, so a
/// conversation can drop from `Critical` back to `Normal`. `lifetime_*`
/// never decrease and are what run results report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageTracker {
    pub cumulative_prompt_tokens: u64,
    pub cumulative_completion_tokens: u64,
    pub lifetime_prompt_tokens: u64,
    pub lifetime_completion_tokens: u64,
    pub context_window_tokens: usize,
}

impl TokenUsageTracker {
    pub fn new(context_window_tokens: usize) -> Self {
        Self {
            cumulative_prompt_tokens: 0,
            cumulative_completion_tokens: 0,
            lifetime_prompt_tokens: 0,
            lifetime_completion_tokens: 0,
            context_window_tokens,
        }
    }

    /// Accumulate the counts reported by one model invocation.
    pub fn record_usage(&mut self, prompt_tokens: u32, completion_tokens: u32) {
        self.cumulative_prompt_tokens += u64::from(prompt_tokens);
        self.cumulative_completion_tokens += u64::from(completion_tokens);
        self.lifetime_prompt_tokens += u64::from(prompt_tokens);
        self.lifetime_completion_tokens += u64::from(completion_tokens);
    }

    /// `cumulative_prompt_tokens / context_window_tokens`. A zero window is
    /// treated as full.
    pub fn usage_ratio(&self) -> f64 {
        if self.context_window_tokens == 0 {
            return 1.0;
        }
        self.cumulative_prompt_tokens as f64 / self.context_window_tokens as f64
    }

    pub fn classify(&self, thresholds: &CompressionThresholds) -> UsageLevel {
        UsageLevel::from_ratio(self.usage_ratio(), thresholds)
    }

    /// Reset the classification basis after the history was compressed.
    pub fn rebase_after_compression(&mut self, estimated_prompt_tokens: usize) {
        self.cumulative_prompt_tokens = estimated_prompt_tokens as u64;
    }

    /// Snapshot for logging.
    pub fn context_usage(&self) -> ContextUsage {
        ContextUsage {
            prompt_tokens: self.cumulative_prompt_tokens,
            max_tokens: self.context_window_tokens,
            usage_pct: self.usage_ratio(),
        }
    }
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub prompt_tokens: u64,
    pub max_tokens: usize,
    /// Usage as a fraction (0.0 to 1.0+).
    pub usage_pct: f64,
}

impl ContextUsage {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} prompt tokens ({:.0}% of {})",
            self.prompt_tokens,
            self.usage_pct * 100.0,
            self.max_tokens,
        )
    }
}
