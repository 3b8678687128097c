//! The summarization collaborator used by context compression.
//!
//! [`Summarizer`] is the seam; [`ModelSummarizer`] is the stock
//! implementation, a one-shot call through any [`ModelClient`] with a
//! structured summary prompt. Earlier summaries found in the input are
//! merged rather than summarized again as ordinary turns.

use crate::api::ModelClient;
use crate::error::CompressionFailure;
use crate::message::Message;
use futures::future::BoxFuture;
use std::fmt::Write as _;

/// Instructs the model to produce a structured, factual summary that can
/// replace the summarized turns.
pub const SUMMARIZATION_PROMPT: &str = "\
You compress the older part of an agent conversation so the agent can keep working \
after those messages are removed. Produce a summary with these sections:

## User intent
What the user asked for, in order, including any change of direction.

## Key facts and decisions
Findings, constraints, and decisions made so far.

## Files touched
Every file path read, created, or modified, verbatim.

## Tool outcomes
Which tools were called, with what purpose, and what they returned (condensed).

## Unresolved errors
Errors or failed approaches that are not yet fixed, with the error text verbatim.

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, identifiers, and error messages verbatim.
- If an existing summary is given, merge the new information into it so the result \
  replaces it entirely. Integrate and deduplicate; do not simply append.
- Be concise.";

/// Turns a span of old messages into summary text.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, CompressionFailure>>;
}

/// Build the (system, user) pair for a one-shot summarization call.
pub fn build_summarization_request(span: &[Message]) -> (String, String) {
    let (earlier, turns): (Vec<&Message>, Vec<&Message>) =
        span.iter().partition(|m| m.is_synthetic());

    let mut content = String::new();
    if !earlier.is_empty() {
        content.push_str("=== EXISTING SUMMARY ===\n");
        for msg in &earlier {
            content.push_str(msg.text().unwrap_or_default());
            content.push_str("\n\n");
        }
        content.push_str("=== NEW MESSAGES TO SUMMARIZE ===\n");
    }

    for msg in turns {
        let text = msg.text().unwrap_or("[no content]");
        let _ = writeln!(content, "[{}]: {text}", msg.kind());
        for call in msg.tool_calls() {
            let _ = writeln!(
                content,
                "[tool call {} -> {}]: {}",
                call.call_id, call.name, call.arguments
            );
        }
        content.push('\n');
    }

    (SUMMARIZATION_PROMPT.to_string(), content)
}

/// Summarizer backed by a [`ModelClient`] (usually the loop's own model).
pub struct ModelSummarizer<'a> {
    model: &'a dyn ModelClient,
}

impl<'a> ModelSummarizer<'a> {
    pub fn new(model: &'a dyn ModelClient) -> Self {
        Self { model }
    }
}

impl Summarizer for ModelSummarizer<'_> {
    fn summarize<'b>(
        &'b self,
        messages: &'b [Message],
    ) -> BoxFuture<'b, Result<String, CompressionFailure>> {
        Box::pin(async move {
            let (system, user) = build_summarization_request(messages);
            let request = [Message::system(system), Message::human(user)];
            let response = self
                .model
                .invoke(&request, &[])
                .await
                .map_err(|e| CompressionFailure::Summarizer(e.to_string()))?;
            match response.content {
                Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
                _ => Err(CompressionFailure::EmptySummary),
            }
        })
    }
}
