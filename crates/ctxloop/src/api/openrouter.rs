//! [`ModelClient`] over the OpenRouter chat completions API.
//!
//! Converts the [`Message`] sum type into the OpenAI-compatible wire shape
//! (role + optional content / tool calls / tool call id), sends it with
//! `reqwest`, and converts the first choice back into a [`ModelResponse`].

use super::retry::{RetryConfig, retry_model_call};
use super::{ModelClient, ModelResponse};
use crate::ToolDef;
use crate::error::ModelError;
use crate::message::{Message, ToolCallRequest};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WireRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

impl From<&ToolCallRequest> for WireToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.call_id.clone(),
            call_type: "function".into(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<WireToolCall> for ToolCallRequest {
    fn from(call: WireToolCall) -> Self {
        ToolCallRequest::new(call.id, call.function.name, call.function.arguments)
    }
}

/// OpenAI-style message as sent over the wire.
#[derive(Serialize, Clone, Debug)]
pub(crate) struct WireMessage {
    pub role: WireRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        match msg {
            Message::System { content } => Self {
                role: WireRole::System,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::Human { content, .. } => Self {
                role: WireRole::User,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::Ai {
                content,
                tool_calls,
            } => Self {
                role: WireRole::Assistant,
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty())
                    .then(|| tool_calls.iter().map(WireToolCall::from).collect()),
                tool_call_id: None,
            },
            Message::ToolResult { call_id, content } => Self {
                role: WireRole::Tool,
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            },
        }
    }
}

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [ToolDef]>,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Parse a response body into a [`ModelResponse`].
fn parse_response(text: &str) -> Result<ModelResponse, ModelError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| ModelError::Parse(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(ModelError::Api(err.message));
    }

    let usage = parsed.usage.unwrap_or_default();
    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    let (content, tool_calls) = match choice {
        Some(c) => (
            c.message.content,
            c.message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(ToolCallRequest::from)
                .collect(),
        ),
        None => {
            debug!("LLM output: empty (no choices)");
            (None, Vec::new())
        }
    };

    Ok(ModelResponse {
        content,
        tool_calls,
        prompt_tokens: usage.prompt_tokens.unwrap_or(0),
        completion_tokens: usage.completion_tokens.unwrap_or(0),
    })
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryConfig,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default settings.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ctxloop/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ModelError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 4096,
            temperature: 0.7,
            retry: RetryConfig::default(),
            referer: "https://github.com/tacryt-socryp/ctxloop".into(),
            title: "ctxloop".into(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a single chat completion request (no retries).
    async fn chat(&self, body: &ChatRequest<'_>) -> Result<ModelResponse, ModelError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.tools.map_or(0, <[ToolDef]>::len),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::Request(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let response = parse_response(&text)?;
        debug!(
            "LLM output: {} chars text, {} tool call(s), tokens prompt={} completion={}",
            response.content.as_ref().map_or(0, String::len),
            response.tool_calls.len(),
            response.prompt_tokens,
            response.completion_tokens,
        );
        Ok(response)
    }
}

impl ModelClient for OpenRouterClient {
    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BoxFuture<'a, Result<ModelResponse, ModelError>> {
        Box::pin(async move {
            let body = ChatRequest {
                model: &self.model,
                messages: messages.iter().map(WireMessage::from).collect(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tools: (!tools.is_empty()).then_some(tools),
            };
            retry_model_call(&self.retry, || self.chat(&body)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_conversion_covers_every_variant() {
        let sys = WireMessage::from(&Message::system("s"));
        assert_eq!(sys.role, WireRole::System);

        let summary = WireMessage::from(&Message::history_summary("x"));
        assert_eq!(summary.role, WireRole::User);

        let ai = WireMessage::from(&Message::ai_tool_calls(
            None,
            vec![ToolCallRequest::new("c1", "think", r#"{"reasoning":"r"}"#)],
        ));
        assert_eq!(ai.role, WireRole::Assistant);
        let calls = ai.tool_calls.unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].call_type, "function");

        let text_ai = WireMessage::from(&Message::ai_text("hi"));
        assert!(text_ai.tool_calls.is_none());

        let result = WireMessage::from(&Message::tool_result("c1", "ok"));
        assert_eq!(result.role, WireRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn request_omits_empty_tools() {
        let body = ChatRequest {
            model: "m",
            messages: vec![WireMessage::from(&Message::human("hi"))],
            max_tokens: 10,
            temperature: 0.5,
            tools: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn parse_tool_call_response() {
        let body = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "think", "arguments": "{}"}}
            ]}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 7, "total_tokens": 127}
        }"#;
        let resp = parse_response(body).unwrap();
        assert_eq!(resp.tool_calls, vec![ToolCallRequest::new("call_1", "think", "{}")]);
        assert_eq!(resp.prompt_tokens, 120);
        assert_eq!(resp.completion_tokens, 7);
    }

    #[test]
    fn parse_api_error() {
        let err = parse_response(r#"{"error": {"message": "model overloaded"}}"#).unwrap_err();
        assert!(matches!(err, ModelError::Api(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn parse_garbage_is_parse_error() {
        assert!(matches!(
            parse_response("not json"),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn parse_no_choices_is_empty_response() {
        let resp = parse_response(r#"{"choices": []}"#).unwrap();
        assert!(resp.content.is_none());
        assert!(resp.tool_calls.is_empty());
    }
}
