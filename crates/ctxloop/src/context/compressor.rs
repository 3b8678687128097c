//! History compression: replace the old part of a transcript with a summary.
//!
//! [`ContextCompressor::compress`] partitions a transcript into three
//! segments:
//!
//! - **System**: every System message, kept verbatim.
//! - **Recent**: the tail kept verbatim, chosen with the same pairing-safe
//!   rule as [`truncate_safely`](super::curator::truncate_safely).
//! - **Old**: everything else. Cleaned of broken pairs, then summarized.
//!
//! The result is `System ++ [summary] ++ Recent`. If the summarizer fails,
//! times out, or returns something that does not actually shrink Old, the
//! compressor falls back to [`hard_truncate`]. Compression never fails
//! outward.

use super::DEFAULT_CHARS_PER_TOKEN;
use super::curator::{clean, hard_truncate, must_keep_indices};
use super::summarizer::Summarizer;
use super::usage::{CompressionThresholds, DEFAULT_CONTEXT_WINDOW};
use crate::error::CompressionFailure;
use crate::message::{Message, estimate_tokens};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default upper bound on one summarizer call.
pub const DEFAULT_SUMMARIZER_TIMEOUT: Duration = Duration::from_secs(120);

/// Minimum fraction by which a summary must shrink the Old segment.
pub const DEFAULT_MIN_REDUCTION: f64 = 0.2;

/// Why a compression pass left the transcript untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer messages than `min_messages_to_compress`.
    BelowMinimum,
    /// Every non-System message falls inside the Recent window.
    NothingOld,
}

/// What a compression pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    Skipped(SkipReason),
    /// Old was replaced by a summary (or dropped, if cleaning emptied it).
    Summarized { summarized_messages: usize },
    /// The summarizer path failed and the transcript was hard truncated.
    Fallback { reason: String },
}

/// Before/after figures for one compression pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionReport {
    pub outcome: CompressionOutcome,
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl CompressionReport {
    pub fn used_fallback(&self) -> bool {
        matches!(self.outcome, CompressionOutcome::Fallback { .. })
    }

    pub fn changed(&self) -> bool {
        !matches!(self.outcome, CompressionOutcome::Skipped(_))
    }
}

/// The System/Recent/Old split of a transcript.
struct Partition {
    system: Vec<Message>,
    recent: Vec<Message>,
    old: Vec<Message>,
}

/// Summarizes the old history segment through a [`Summarizer`].
pub struct ContextCompressor<'a> {
    summarizer: &'a dyn Summarizer,
    thresholds: CompressionThresholds,
    context_window_tokens: usize,
    chars_per_token: f64,
    min_reduction: f64,
    summarizer_timeout: Option<Duration>,
}

impl<'a> ContextCompressor<'a> {
    pub fn new(summarizer: &'a dyn Summarizer, thresholds: CompressionThresholds) -> Self {
        Self {
            summarizer,
            thresholds,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            min_reduction: DEFAULT_MIN_REDUCTION,
            summarizer_timeout: Some(DEFAULT_SUMMARIZER_TIMEOUT),
        }
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn with_chars_per_token(mut self, chars_per_token: f64) -> Self {
        self.chars_per_token = chars_per_token;
        self
    }

    pub fn with_min_reduction(mut self, fraction: f64) -> Self {
        self.min_reduction = fraction;
        self
    }

    pub fn with_summarizer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.summarizer_timeout = timeout;
        self
    }

    fn estimate(&self, messages: &[Message]) -> usize {
        estimate_tokens(messages, self.chars_per_token)
    }

    /// Number of trailing non-System messages that fit in the ratio-derived
    /// token window.
    fn ratio_recent_count(&self, messages: &[Message]) -> usize {
        let budget = ((self.thresholds.keep_recent_ratio * self.context_window_tokens as f64)
            as usize)
            .max(self.thresholds.keep_recent_window_floor);
        let mut used = 0;
        let mut count = 0;
        for msg in messages.iter().rev().filter(|m| !m.is_system()) {
            used += self.estimate(std::slice::from_ref(msg));
            if used > budget {
                break;
            }
            count += 1;
        }
        count
    }

    /// How many trailing messages the Recent segment is sized from.
    pub fn recent_count(&self, messages: &[Message]) -> usize {
        self.thresholds
            .keep_recent_messages
            .max(self.ratio_recent_count(messages))
    }

    fn partition(&self, messages: &[Message]) -> Partition {
        let keep = must_keep_indices(messages, self.recent_count(messages));
        let mut partition = Partition {
            system: Vec::new(),
            recent: Vec::new(),
            old: Vec::new(),
        };
        for (i, msg) in messages.iter().enumerate() {
            if msg.is_system() {
                partition.system.push(msg.clone());
            } else if keep.contains(&i) {
                partition.recent.push(msg.clone());
            } else {
                partition.old.push(msg.clone());
            }
        }
        partition
    }

    async fn summarize(&self, old: &[Message]) -> Result<String, CompressionFailure> {
        let call = self.summarizer.summarize(old);
        let text = match self.summarizer_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                CompressionFailure::Summarizer(format!("timed out after {limit:?}"))
            })??,
            None => call.await?,
        };
        if text.trim().is_empty() {
            return Err(CompressionFailure::EmptySummary);
        }
        Ok(text)
    }

    /// Compress `messages`, returning the new transcript and a report.
    pub async fn compress(&self, messages: &[Message]) -> (Vec<Message>, CompressionReport) {
        let messages_before = messages.len();
        let tokens_before = self.estimate(messages);
        let unchanged = |reason| {
            (
                messages.to_vec(),
                CompressionReport {
                    outcome: CompressionOutcome::Skipped(reason),
                    messages_before,
                    messages_after: messages_before,
                    tokens_before,
                    tokens_after: tokens_before,
                },
            )
        };

        if messages.len() < self.thresholds.min_messages_to_compress {
            debug!(
                "Compression skipped: {} messages < minimum {}",
                messages.len(),
                self.thresholds.min_messages_to_compress
            );
            return unchanged(SkipReason::BelowMinimum);
        }

        let Partition {
            system,
            recent,
            old,
        } = self.partition(messages);
        if old.is_empty() {
            debug!("Compression skipped: no messages outside the recent window");
            return unchanged(SkipReason::NothingOld);
        }

        let old = clean(&old);
        let (compressed, outcome) = match self.summarize_old(&old).await {
            Ok(summary) => {
                let mut out = system;
                out.extend(summary);
                out.extend(recent);
                let outcome = CompressionOutcome::Summarized {
                    summarized_messages: old.len(),
                };
                (out, outcome)
            }
            Err(e) => {
                warn!("Context compression failed: {e}. Falling back to hard truncation.");
                let out = hard_truncate(messages, self.thresholds.max_history_messages);
                (
                    out,
                    CompressionOutcome::Fallback {
                        reason: e.to_string(),
                    },
                )
            }
        };

        let report = CompressionReport {
            outcome,
            messages_before,
            messages_after: compressed.len(),
            tokens_before,
            tokens_after: self.estimate(&compressed),
        };
        info!(
            "Compressed context: {} -> {} messages, ~{} -> ~{} tokens{}",
            report.messages_before,
            report.messages_after,
            report.tokens_before,
            report.tokens_after,
            if report.used_fallback() {
                " (fallback)"
            } else {
                ""
            },
        );
        (compressed, report)
    }

    /// The summary message replacing a cleaned Old segment, or `None` when
    /// cleaning left nothing to summarize.
    async fn summarize_old(&self, old: &[Message]) -> Result<Option<Message>, CompressionFailure> {
        if old.is_empty() {
            return Ok(None);
        }
        let text = self.summarize(old).await?;
        let summary = Message::history_summary(text.trim());

        let old_tokens = self.estimate(old);
        let summary_tokens = self.estimate(std::slice::from_ref(&summary));
        if summary_tokens as f64 > old_tokens as f64 * (1.0 - self.min_reduction) {
            return Err(CompressionFailure::InsufficientReduction {
                old_tokens,
                summary_tokens,
            });
        }
        Ok(Some(summary))
    }
}
