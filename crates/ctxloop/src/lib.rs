//! Conversation context and execution-loop manager for LLM tool-use agents.
//!
//! `ctxloop` drives a conversation through a bounded
//! `Plan → Act → [Compress] → Finalize` state machine. It keeps the
//! transcript valid for chat-completion APIs (every tool call answered,
//! nothing orphaned), tracks context-window usage, and compresses old
//! history into a summary before the window overflows.
//!
//! # Getting started
//!
//! ```ignore
//! use ctxloop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api_key = std::env::var("OPENROUTER_KEY")?;
//!     let client = OpenRouterClient::new(api_key)?;
//!     let tools = ToolSet::new().with(ThinkTool).with(TodoTool);
//!     let store = FileCheckpointStore::new(".ctxloop/checkpoints")?;
//!
//!     let controller = LoopController::new(&client, &tools, LoopConfig::default())
//!         .with_checkpoint_store(&store)
//!         .with_event_handler(&LoggingHandler);
//!
//!     let state = controller.new_state(vec![
//!         Message::system("You are a careful research assistant."),
//!         Message::human("Compare the two attached reports."),
//!     ]);
//!     let result = controller.run(state).await?;
//!     println!("{}", result.final_text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run the loop:** [`LoopController`](agent::controller::LoopController)
//!   and [`LoopConfig`](agent::config::LoopConfig). Resume a crashed run with
//!   [`LoopController::resume`](agent::controller::LoopController::resume).
//! - **Keep transcripts valid:** [`context::curator`] (`clean`,
//!   `truncate_safely`, `hard_truncate`).
//! - **Track usage and compress:** [`context::usage`] and
//!   [`ContextCompressor`](context::compressor::ContextCompressor).
//! - **Define tools:** the [`Tool`](tools::core::Tool) trait,
//!   [`ToolSet`](tools::core::ToolSet), [`FnTool`](tools::core::FnTool).
//! - **Delegate:** [`SubagentIsolator`](agent::sub_agent::SubagentIsolator)
//!   and its [`DelegateTool`](agent::sub_agent::DelegateTool).
//! - **Observe:** implement [`EventHandler`](agent::events::EventHandler), or
//!   use [`LoggingHandler`](agent::events::LoggingHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`message`] | [`Message`] sum type, tool call requests, token estimation |
//! | [`context`] | Curator, usage tracker, summarizer, compressor |
//! | [`agent`] | Loop controller, state, config, events, approval, checkpoints, subagents |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), pseudo-tools |
//! | [`api`] | [`ModelClient`](api::ModelClient) trait, OpenRouter client, retry with backoff |
//! | [`error`] | Error taxonomy |

pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod message;
pub mod prelude;
pub mod tools;

#[cfg(test)]
mod test_support;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use message::{Message, ToolCallRequest};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the function-calling API expects.
///
/// # Example
///
/// ```
/// use ctxloop::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Tool definitions ───────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
