//! Model invocation: the [`ModelClient`] collaborator and its implementations.
//!
//! - [`ModelClient`] is the seam the loop controller, summarizer, and
//!   finalizer call through. Implement it to plug in any provider.
//! - [`openrouter`] is an HTTP implementation over the OpenRouter chat
//!   completions API.
//! - [`retry`] holds exponential backoff for transient provider errors.

pub mod openrouter;
pub mod retry;

use crate::ToolDef;
use crate::error::ModelError;
use crate::message::{Message, ToolCallRequest};
use futures::future::BoxFuture;

pub use openrouter::OpenRouterClient;
pub use retry::RetryConfig;

/// What one model invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A response requesting tool calls.
    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    /// Attach reported token usage (builder pattern).
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Convert into the AI message appended to the transcript.
    pub fn to_message(&self) -> Message {
        let content = self.content.clone().filter(|c| !c.is_empty());
        Message::ai_tool_calls(content, self.tool_calls.clone())
    }
}

/// A chat model that can be asked for the next turn.
///
/// Uses a boxed future so the trait stays dyn-compatible.
pub trait ModelClient: Send + Sync {
    /// Send the transcript plus the tool schemas the model may call.
    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BoxFuture<'a, Result<ModelResponse, ModelError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_becomes_none() {
        let msg = ModelResponse::text("").to_message();
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn tool_call_response_converts() {
        let resp = ModelResponse::tool_calls(vec![ToolCallRequest::new("c1", "think", "{}")])
            .with_usage(10, 2);
        assert!(resp.has_tool_calls());
        assert_eq!(resp.to_message().tool_calls().len(), 1);
        assert_eq!(resp.prompt_tokens, 10);
    }
}
