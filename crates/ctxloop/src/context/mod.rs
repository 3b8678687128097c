//! Context window management: pairing-safe curation, usage tracking, and
//! summarization-based compression.
//!
//! The context window is the scarcest resource in any LLM agent. This module
//! keeps a transcript inside it without ever producing a sequence the model
//! API would reject:
//!
//! 1. **[`curator`]**: pure functions that clean and truncate a message
//!    sequence while keeping every tool call paired with its result.
//!
//! 2. **[`usage`]**: [`TokenUsageTracker`] accumulates reported token counts
//!    and classifies them against [`CompressionThresholds`].
//!
//! 3. **[`summarizer`]**: the [`Summarizer`] collaborator and its
//!    model-backed implementation.
//!
//! 4. **[`compressor`]**: [`ContextCompressor`] splits a transcript into
//!    System / Recent / Old, replaces Old with a summary, and falls back to
//!    hard truncation when summarization fails.

pub mod compressor;
pub mod curator;
pub mod summarizer;
pub mod usage;

/// Rough chars-per-token ratio used for all local token estimates.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

pub use compressor::{CompressionOutcome, CompressionReport, ContextCompressor};
pub use summarizer::{ModelSummarizer, Summarizer};
pub use usage::{CompressionThresholds, ContextUsage, TokenUsageTracker, UsageLevel};
