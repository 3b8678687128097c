//! The unit of execution: one conversation driven by one loop controller.

use crate::context::usage::TokenUsageTracker;
use crate::message::{Message, ToolCallRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Generate a fresh, globally unique context id.
pub fn new_context_id() -> String {
    format!("ctx-{}", uuid::Uuid::new_v4().simple())
}

/// Status of a todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TodoStatus::Pending => write!(f, "[ ]"),
            TodoStatus::InProgress => write!(f, "[~]"),
            TodoStatus::Completed => write!(f, "[x]"),
        }
    }
}

/// A single todo item. Informational only; the loop never reads it to
/// decide when to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TodoItem {
    /// What needs doing.
    pub description: String,
    /// Current status.
    pub status: TodoStatus,
}

/// State owned exclusively by one [`LoopController`](super::controller::LoopController) run.
///
/// Subagents get their own instance via [`ConversationState::child`]; nothing
/// here is shared between parent and child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub context_id: String,
    /// `None` for a root conversation.
    pub parent_context_id: Option<String>,
    /// The API-visible transcript, in insertion order.
    pub messages: Vec<Message>,
    /// Incremented once per `Act` step, never elsewhere.
    pub loop_count: u32,
    pub max_loop_count: u32,
    pub usage: TokenUsageTracker,
    pub compression_pending: bool,
    pub compression_performed_this_turn: bool,
    #[serde(default)]
    pub todo_list: Vec<TodoItem>,
}

impl ConversationState {
    /// A new root conversation.
    pub fn new(messages: Vec<Message>, max_loop_count: u32, context_window_tokens: usize) -> Self {
        Self {
            context_id: new_context_id(),
            parent_context_id: None,
            messages,
            loop_count: 0,
            max_loop_count,
            usage: TokenUsageTracker::new(context_window_tokens),
            compression_pending: false,
            compression_performed_this_turn: false,
            todo_list: Vec::new(),
        }
    }

    /// A fresh child conversation for a delegated task: new id, parent link,
    /// one human message, zeroed counters.
    pub fn child(
        parent_context_id: &str,
        task: impl Into<String>,
        max_loop_count: u32,
        context_window_tokens: usize,
    ) -> Self {
        Self {
            parent_context_id: Some(parent_context_id.to_string()),
            ..Self::new(
                vec![Message::human(task)],
                max_loop_count,
                context_window_tokens,
            )
        }
    }

    pub fn cumulative_prompt_tokens(&self) -> u64 {
        self.usage.cumulative_prompt_tokens
    }

    pub fn cumulative_completion_tokens(&self) -> u64 {
        self.usage.cumulative_completion_tokens
    }

    pub fn loop_limit_reached(&self) -> bool {
        self.loop_count >= self.max_loop_count
    }

    /// Tool calls in the last AI message that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallRequest> {
        let Some(ai_index) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Ai { .. }))
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[ai_index + 1..]
            .iter()
            .filter_map(Message::answered_call_id)
            .collect();
        self.messages[ai_index]
            .tool_calls()
            .iter()
            .filter(|c| !answered.contains(c.call_id.as_str()))
            .cloned()
            .collect()
    }

    /// Text of the most recent AI message that has any.
    pub fn last_ai_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| matches!(m, Message::Ai { .. }))
            .find_map(|m| m.text().filter(|t| !t.trim().is_empty()))
    }

    /// Render the todo list as a checklist.
    pub fn format_todo_list(&self) -> String {
        format_todo_list(&self.todo_list)
    }
}

/// Render a todo list as a numbered checklist.
pub fn format_todo_list(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list is empty.".into();
    }
    let mut out = String::from("Todo list:\n");
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("  {}. {} {}\n", i + 1, item.status, item.description));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_unique() {
        let a = ConversationState::new(vec![], 5, 1000);
        let b = ConversationState::new(vec![], 5, 1000);
        assert_ne!(a.context_id, b.context_id);
        assert!(a.context_id.starts_with("ctx-"));
    }

    #[test]
    fn child_is_fresh_and_linked() {
        let parent = ConversationState::new(vec![Message::human("root")], 10, 1000);
        let child = ConversationState::child(&parent.context_id, "sub task", 3, 500);
        assert_eq!(child.parent_context_id.as_deref(), Some(parent.context_id.as_str()));
        assert_ne!(child.context_id, parent.context_id);
        assert_eq!(child.messages, vec![Message::human("sub task")]);
        assert_eq!(child.loop_count, 0);
        assert_eq!(child.max_loop_count, 3);
        assert!(child.todo_list.is_empty());
    }

    #[test]
    fn pending_tool_calls_skip_answered() {
        let mut state = ConversationState::new(vec![], 5, 1000);
        state.messages.push(Message::ai_tool_calls(
            None,
            vec![
                ToolCallRequest::new("1", "a", "{}"),
                ToolCallRequest::new("2", "b", "{}"),
            ],
        ));
        state.messages.push(Message::tool_result("1", "done"));
        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].call_id, "2");
    }

    #[test]
    fn pending_tool_calls_empty_without_ai() {
        let state = ConversationState::new(vec![Message::human("hi")], 5, 1000);
        assert!(state.pending_tool_calls().is_empty());
    }

    #[test]
    fn last_ai_text_skips_tool_call_only_turns() {
        let mut state = ConversationState::new(vec![], 5, 1000);
        state.messages.push(Message::ai_text("first answer"));
        state
            .messages
            .push(Message::ai_tool_calls(None, vec![ToolCallRequest::new("1", "a", "{}")]));
        assert_eq!(state.last_ai_text(), Some("first answer"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = ConversationState::new(vec![Message::system("s")], 5, 1000);
        state.todo_list.push(TodoItem {
            description: "write tests".into(),
            status: TodoStatus::InProgress,
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn todo_list_formatting() {
        let items = vec![
            TodoItem {
                description: "plan".into(),
                status: TodoStatus::Completed,
            },
            TodoItem {
                description: "build".into(),
                status: TodoStatus::Pending,
            },
        ];
        let out = format_todo_list(&items);
        assert!(out.contains("1. [x] plan"));
        assert!(out.contains("2. [ ] build"));
        assert_eq!(format_todo_list(&[]), "Todo list is empty.");
    }
}
