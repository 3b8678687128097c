//! Conversation messages as a closed sum type.
//!
//! Every consumer (curator, compressor, controller, wire conversion) matches
//! exhaustively on [`Message`], so adding a variant is a compile error in
//! every place that needs to handle it.

use serde::{Deserialize, Serialize};

/// Opening tag wrapped around machine-generated history summaries.
pub const SUMMARY_OPEN_TAG: &str = "<context_summary>";
/// Closing tag wrapped around machine-generated history summaries.
pub const SUMMARY_CLOSE_TAG: &str = "</context_summary>";

/// A tool invocation requested by the model inside an [`Message::Ai`] turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCallRequest {
    /// Conversation-unique id that the matching [`Message::ToolResult`] echoes.
    pub call_id: String,
    /// Tool name as registered in the tool set.
    pub name: String,
    /// Raw JSON argument string, exactly as produced by the model.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Discriminant of a [`Message`], handy for logging and events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    System,
    Human,
    Ai,
    ToolResult,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::System => write!(f, "system"),
            MessageKind::Human => write!(f, "human"),
            MessageKind::Ai => write!(f, "ai"),
            MessageKind::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// One entry in the API-visible transcript.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// Instructions that are never dropped by truncation or compression.
    System { content: String },
    /// A user turn. `synthetic` marks text generated by the runtime (history
    /// summaries, continuation nudges) rather than typed by a person.
    Human {
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        synthetic: bool,
    },
    /// A model turn, optionally requesting tool calls.
    Ai {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// The answer to exactly one earlier [`ToolCallRequest`].
    ToolResult { call_id: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
            synthetic: false,
        }
    }

    /// A runtime-generated user turn (not a real user utterance).
    pub fn synthetic_human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
            synthetic: true,
        }
    }

    /// The single message that replaces a compressed history segment.
    pub fn history_summary(summary: &str) -> Self {
        Message::synthetic_human(format!(
            "{SUMMARY_OPEN_TAG}\n\
             The earlier part of this conversation was compressed by the runtime. \
             This is a machine-generated summary, not a new request from the user.\n\n\
             {summary}\n\
             {SUMMARY_CLOSE_TAG}"
        ))
    }

    pub fn ai_text(content: impl Into<String>) -> Self {
        Message::Ai {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn ai_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Message::Ai {
            content,
            tool_calls,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System { .. } => MessageKind::System,
            Message::Human { .. } => MessageKind::Human,
            Message::Ai { .. } => MessageKind::Ai,
            Message::ToolResult { .. } => MessageKind::ToolResult,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    /// Text content, if any. AI turns that only carry tool calls return `None`.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::Human { content, .. }
            | Message::ToolResult { content, .. } => Some(content),
            Message::Ai { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls requested by this message (empty for non-AI variants).
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Message::Ai { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// The `call_id` answered by this message, if it is a tool result.
    pub fn answered_call_id(&self) -> Option<&str> {
        match self {
            Message::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Whether this is a runtime-generated human turn.
    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            Message::Human {
                synthetic: true,
                ..
            }
        )
    }

    /// Characters that count toward the prompt: text plus tool-call names
    /// and argument payloads.
    pub fn char_len(&self) -> usize {
        let text = self.text().map_or(0, str::len);
        let calls: usize = self
            .tool_calls()
            .iter()
            .map(|c| c.call_id.len() + c.name.len() + c.arguments.len())
            .sum();
        let id = self.answered_call_id().map_or(0, str::len);
        text + calls + id
    }
}

/// Estimate tokens for a message slice using a chars-per-token ratio.
pub fn estimate_tokens(messages: &[Message], chars_per_token: f64) -> usize {
    let chars: usize = messages.iter().map(Message::char_len).sum();
    (chars as f64 / chars_per_token).ceil() as usize
}
