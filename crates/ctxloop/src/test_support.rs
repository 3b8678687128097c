//! Scripted collaborators shared by unit tests.

use crate::ToolDef;
use crate::api::{ModelClient, ModelResponse};
use crate::context::summarizer::Summarizer;
use crate::error::{CompressionFailure, ModelError};
use crate::message::{Message, ToolCallRequest};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One recorded model invocation.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Model that replays a queue of responses, then repeats a fallback.
pub struct ScriptedModel {
    script: Mutex<VecDeque<ModelResponse>>,
    fallback: ModelResponse,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: Vec<ModelResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: ModelResponse::text("script exhausted"),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep for `delay` before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers every call with the same response.
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            fallback: response,
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ModelClient for ScriptedModel {
    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: &'a [ToolDef],
    ) -> BoxFuture<'a, Result<ModelResponse, ModelError>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.function.name.clone()).collect(),
        });
        let scripted = self.script.lock().unwrap().pop_front();
        let next = scripted.unwrap_or_else(|| {
            // Keep call ids unique across repeated fallback turns.
            let n = self.requests.lock().unwrap().len();
            let mut response = self.fallback.clone();
            for call in &mut response.tool_calls {
                call.call_id = format!("{}-{n}", call.call_id);
            }
            response
        });
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(next)
        })
    }
}

/// Model that is always unreachable.
pub struct FailingModel {
    message: String,
    calls: AtomicUsize,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelClient for FailingModel {
    fn invoke<'a>(
        &'a self,
        _messages: &'a [Message],
        _tools: &'a [ToolDef],
    ) -> BoxFuture<'a, Result<ModelResponse, ModelError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let err = ModelError::Request(self.message.clone());
        Box::pin(async move { Err(err) })
    }
}

/// Summarizer returning fixed text and counting calls.
pub struct StaticSummarizer {
    text: String,
    calls: AtomicUsize,
}

impl StaticSummarizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Summarizer for StaticSummarizer {
    fn summarize<'a>(
        &'a self,
        _messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, CompressionFailure>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.text.clone();
        Box::pin(async move { Ok(text) })
    }
}

/// Summarizer that always fails.
pub struct FailingSummarizer;

impl Summarizer for FailingSummarizer {
    fn summarize<'a>(
        &'a self,
        _messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, CompressionFailure>> {
        Box::pin(async { Err(CompressionFailure::Summarizer("summarizer exploded".into())) })
    }
}

/// A transcript of `n` messages: one System message followed by
/// alternating human/AI text turns, each `chars` characters long.
pub fn long_transcript(n: usize, chars: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a test agent.")];
    for i in 1..n {
        let body = format!("{i:04}{}", "x".repeat(chars.saturating_sub(4)));
        if i % 2 == 1 {
            messages.push(Message::human(body));
        } else {
            messages.push(Message::ai_text(body));
        }
    }
    messages
}

/// An AI turn requesting a single call to `tool`.
pub fn tool_call(call_id: &str, tool: &str, arguments: &str) -> ModelResponse {
    ModelResponse::tool_calls(vec![ToolCallRequest::new(call_id, tool, arguments)])
}
