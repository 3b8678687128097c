//! Pairing-safe cleanup and truncation of message sequences.
//!
//! LLM chat APIs reject transcripts where an assistant tool call has no
//! answer, or where a tool result answers a call that is not in the
//! transcript. Every function here returns a subsequence of its input (never
//! reordered, never rewritten) that keeps this pairing intact:
//!
//! - [`clean`] drops AI turns with unanswered tool calls, and any tool
//!   results left without their request.
//! - [`truncate_safely`] keeps the most recent `keep_recent` messages plus
//!   every System message and whatever AI turns the kept tool results need.
//! - [`hard_truncate`] is the non-LLM fallback used by the compressor.
//!
//! All of these are total: malformed input (a tool result whose `call_id`
//! matches nothing) is dropped, never reported.

use crate::message::Message;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Which AI message each tool result answers, and the reverse.
struct PairingIndex {
    /// `result_to_ai[i]` is the AI index answered by the tool result at `i`.
    result_to_ai: HashMap<usize, usize>,
    /// Tool result indices answering each AI message.
    ai_to_results: HashMap<usize, Vec<usize>>,
}

impl PairingIndex {
    /// A tool result pairs with the most recent earlier AI message that
    /// requested its `call_id` and has not already been answered for it.
    fn build(messages: &[Message]) -> Self {
        let mut open: HashMap<&str, usize> = HashMap::new();
        let mut result_to_ai = HashMap::new();
        let mut ai_to_results: HashMap<usize, Vec<usize>> = HashMap::new();

        for (i, msg) in messages.iter().enumerate() {
            match msg {
                Message::Ai { tool_calls, .. } => {
                    for call in tool_calls {
                        open.insert(call.call_id.as_str(), i);
                    }
                }
                Message::ToolResult { call_id, .. } => {
                    if let Some(ai) = open.remove(call_id.as_str()) {
                        result_to_ai.insert(i, ai);
                        ai_to_results.entry(ai).or_default().push(i);
                    }
                }
                Message::System { .. } | Message::Human { .. } => {}
            }
        }

        Self {
            result_to_ai,
            ai_to_results,
        }
    }

    fn is_paired_result(&self, index: usize) -> bool {
        self.result_to_ai.contains_key(&index)
    }
}

/// Remove AI messages with at least one unanswered tool call, then remove
/// tool results whose request is no longer present.
///
/// Idempotent: `clean(&clean(m)) == clean(m)`.
pub fn clean(messages: &[Message]) -> Vec<Message> {
    // Backward pass: an AI turn survives only if every call is answered later.
    let mut answered_later: HashSet<&str> = HashSet::new();
    let mut keep = vec![true; messages.len()];
    for (i, msg) in messages.iter().enumerate().rev() {
        match msg {
            Message::ToolResult { call_id, .. } => {
                answered_later.insert(call_id.as_str());
            }
            Message::Ai { tool_calls, .. } => {
                keep[i] = tool_calls
                    .iter()
                    .all(|c| answered_later.contains(c.call_id.as_str()));
            }
            Message::System { .. } | Message::Human { .. } => {}
        }
    }

    let survivors: Vec<&Message> = messages
        .iter()
        .zip(&keep)
        .filter_map(|(m, k)| k.then_some(m))
        .collect();

    // Forward pass: a tool result survives only if a surviving AI asked for it.
    let mut open: HashSet<&str> = HashSet::new();
    let mut cleaned = Vec::with_capacity(survivors.len());
    for msg in survivors {
        match msg {
            Message::Ai { tool_calls, .. } => {
                open.extend(tool_calls.iter().map(|c| c.call_id.as_str()));
                cleaned.push(msg.clone());
            }
            Message::ToolResult { call_id, .. } => {
                if open.remove(call_id.as_str()) {
                    cleaned.push(msg.clone());
                }
            }
            Message::System { .. } | Message::Human { .. } => cleaned.push(msg.clone()),
        }
    }

    let dropped = messages.len() - cleaned.len();
    if dropped > 0 {
        debug!("Curator clean dropped {dropped} message(s) with broken tool-call pairing");
    }
    cleaned
}

/// Keep the last `keep_recent` messages, every System message, and the AI
/// turn (plus its sibling results) for every kept tool result.
///
/// Order is preserved. Tool results that pair with no AI turn are dropped.
pub fn truncate_safely(messages: &[Message], keep_recent: usize) -> Vec<Message> {
    let keep = must_keep_indices(messages, keep_recent);
    messages
        .iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, m)| m.clone())
        .collect()
}

/// Fallback truncation: System messages plus the most recent `max_messages`
/// by the pairing-safe rule. No model call involved.
pub fn hard_truncate(messages: &[Message], max_messages: usize) -> Vec<Message> {
    let truncated = truncate_safely(messages, max_messages);
    debug!(
        "Hard truncation: {} -> {} messages (limit {max_messages})",
        messages.len(),
        truncated.len()
    );
    truncated
}

/// The index set [`truncate_safely`] retains.
pub(crate) fn must_keep_indices(messages: &[Message], keep_recent: usize) -> BTreeSet<usize> {
    let index = PairingIndex::build(messages);
    let cutoff = messages.len().saturating_sub(keep_recent);

    let mut keep: BTreeSet<usize> = BTreeSet::new();
    for (i, msg) in messages.iter().enumerate() {
        if msg.is_system() {
            keep.insert(i);
            continue;
        }
        if i < cutoff {
            continue;
        }
        match msg {
            Message::ToolResult { .. } if !index.is_paired_result(i) => {}
            _ => {
                keep.insert(i);
            }
        }
    }

    // Pull in the requesting AI turn of every kept result, and that turn's
    // other results so the AI message is not left half answered.
    let kept_results: Vec<usize> = keep
        .iter()
        .copied()
        .filter(|i| index.is_paired_result(*i))
        .collect();
    for result in kept_results {
        if let Some(&ai) = index.result_to_ai.get(&result) {
            keep.insert(ai);
            if let Some(siblings) = index.ai_to_results.get(&ai) {
                keep.extend(siblings.iter().copied());
            }
        }
    }

    keep
}

/// Whether every tool result answers exactly one earlier AI request and
/// every AI request is answered later in the sequence.
pub fn is_well_paired(messages: &[Message]) -> bool {
    let index = PairingIndex::build(messages);
    let results_ok = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.answered_call_id().is_some())
        .all(|(i, _)| index.is_paired_result(i));
    let requests_ok = messages.iter().enumerate().all(|(i, m)| {
        let calls = m.tool_calls().len();
        calls == 0 || index.ai_to_results.get(&i).map_or(0, Vec::len) == calls
    });
    results_ok && requests_ok
}

/// Indices of tool results that answer no earlier AI request.
pub fn find_orphaned_results(messages: &[Message]) -> Vec<usize> {
    let index = PairingIndex::build(messages);
    messages
        .iter()
        .enumerate()
        .filter(|(i, m)| m.answered_call_id().is_some() && !index.is_paired_result(*i))
        .map(|(i, _)| i)
        .collect()
}

/// Every retained tool result has exactly one retained AI message carrying
/// a matching request.
pub fn results_have_unique_requests(messages: &[Message]) -> bool {
    messages.iter().enumerate().all(|(i, m)| {
        let Some(call_id) = m.answered_call_id() else {
            return true;
        };
        messages[..i]
            .iter()
            .filter(|prev| prev.tool_calls().iter().any(|c| c.call_id == call_id))
            .count()
            == 1
    })
}
