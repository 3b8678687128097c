//! Events, handlers, and run results for the [`LoopController`](super::controller::LoopController).
//!
//! The controller reports every step of a run through [`LoopEvent`]
//! variants: phase entries, model output, tool execution, compression, and
//! checkpointing. Handlers are observers only; nothing they do can change
//! the course of a run. Tool gating lives in
//! [`ApprovalGate`](super::approval::ApprovalGate) instead.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`ToolResultHandler`] | Per-tool-name callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use super::controller::LoopPhase;
use super::state::ConversationState;
use crate::context::{CompressionReport, ContextUsage, UsageLevel};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the controller during a run.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// The state machine entered a phase.
    PhaseEntered {
        phase: LoopPhase,
        loop_count: u32,
        max_loop_count: u32,
        context_usage: &'a ContextUsage,
    },
    /// The model returned text (may be alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls.
    ToolCallsReceived { loop_count: u32, count: usize },
    /// A single tool is about to be executed.
    ToolExecuting { name: &'a str, arguments: &'a str },
    /// A single tool finished (successfully or with rendered error text).
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
    },
    /// The approval gate refused a tool call.
    ApprovalDenied { name: &'a str, reason: &'a str },
    /// Token usage reported by the model for one invocation.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// Usage classification moved to a different level.
    UsageLevelChanged { from: UsageLevel, to: UsageLevel },
    /// Critical usage: the next step is compression instead of a model call.
    CompressionStarted { messages: usize },
    /// A compression pass completed (summarized, fell back, or skipped).
    Compressed { report: &'a CompressionReport },
    /// State recorded durably at a phase boundary.
    CheckpointSaved {
        context_id: &'a str,
        next_phase: LoopPhase,
    },
    /// A run picked up from a stored checkpoint.
    CheckpointResumed {
        context_id: &'a str,
        loop_count: u32,
        next_phase: LoopPhase,
    },
    /// `loop_count` hit `max_loop_count`; the run is being forced to finalize.
    LoopLimitReached { max_loop_count: u32 },
    /// The run produced its final answer.
    Finished { termination: Termination },
}

impl LoopEvent<'_> {
    /// Extract total tokens from a `TokenUsage` event as `u64`.
    pub fn total_tokens(&self) -> Option<u64> {
        if let LoopEvent::TokenUsage {
            prompt_tokens,
            completion_tokens,
        } = self
        {
            Some(u64::from(*prompt_tokens) + u64::from(*completion_tokens))
        } else {
            None
        }
    }
}

/// Observer for loop events.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &LoopEvent<'_>) {
///         if let LoopEvent::Text(text) = event {
///             println!("{text}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &LoopEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let LoopEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&LoopEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &LoopEvent<'_>) {
        (self.0)(event);
    }
}

/// Dispatches every event to several handlers, in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_printer);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Boxed callback for a tool result.
type ToolResultCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Dispatches `ToolResult` events to per-tool-name callbacks.
///
/// ```ignore
/// let handler = ToolResultHandler::new()
///     .on("todo_write", |result| println!("{result}"));
/// ```
pub struct ToolResultHandler {
    callbacks: Vec<(String, ToolResultCallback)>,
}

impl ToolResultHandler {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Register a callback for a tool name. Several callbacks may share a
    /// name; all of them fire.
    pub fn on(
        mut self,
        tool_name: impl Into<String>,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.push((tool_name.into(), Box::new(callback)));
        self
    }
}

impl Default for ToolResultHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for ToolResultHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        if let LoopEvent::ToolResult { name, result, .. } = event {
            for (tool_name, callback) in &self.callbacks {
                if tool_name == name {
                    callback(result);
                }
            }
        }
    }
}

/// Logs every event via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        match event {
            LoopEvent::PhaseEntered {
                phase,
                loop_count,
                max_loop_count,
                context_usage,
            } => {
                debug!(
                    "[{phase} {loop_count}/{max_loop_count}] {}",
                    context_usage.to_log_string()
                );
            }
            LoopEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            LoopEvent::ToolCallsReceived { loop_count, count } => {
                debug!("{count} tool call(s) at loop {loop_count}");
            }
            LoopEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            LoopEvent::ToolResult { name, result, .. } => {
                debug!("Tool {name} result: {} bytes", result.len());
            }
            LoopEvent::ApprovalDenied { name, reason } => {
                info!("Tool {name} denied: {reason}");
            }
            LoopEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            LoopEvent::UsageLevelChanged { from, to } => {
                if to > from {
                    warn!("Context usage rose from {from} to {to}");
                } else {
                    info!("Context usage dropped from {from} to {to}");
                }
            }
            LoopEvent::CompressionStarted { messages } => {
                info!("Context usage critical; compressing {messages} messages");
            }
            LoopEvent::Compressed { report } => {
                info!(
                    "Compression {:?}: {} -> {} messages, ~{} -> ~{} tokens",
                    report.outcome,
                    report.messages_before,
                    report.messages_after,
                    report.tokens_before,
                    report.tokens_after,
                );
            }
            LoopEvent::CheckpointSaved {
                context_id,
                next_phase,
            } => {
                debug!("Checkpoint saved for {context_id} (next: {next_phase})");
            }
            LoopEvent::CheckpointResumed {
                context_id,
                loop_count,
                next_phase,
            } => {
                info!("Resumed {context_id} at loop {loop_count} (next: {next_phase})");
            }
            LoopEvent::LoopLimitReached { max_loop_count } => {
                info!("Loop limit reached ({max_loop_count}); finalizing");
            }
            LoopEvent::Finished { termination } => {
                info!("Loop finished ({termination})");
            }
        }
    }
}

// ── Run result ─────────────────────────────────────────────────────

/// How a run reached `Finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model answered without requesting tools.
    Completed,
    /// `max_loop_count` was reached first.
    LoopLimit,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::LoopLimit => write!(f, "loop limit"),
        }
    }
}

/// The result of a complete [`LoopController::run`](super::controller::LoopController::run).
#[derive(Debug, Clone)]
pub struct LoopResult {
    /// The user-visible answer produced by the finalizer.
    pub final_text: String,
    pub termination: Termination,
    /// Compression passes performed during this invocation.
    pub compressions: u32,
    /// The conversation as it stood at `Finalize`.
    pub state: ConversationState,
}

impl LoopResult {
    pub fn finished(&self) -> bool {
        self.termination == Termination::Completed
    }

    pub fn loop_count(&self) -> u32 {
        self.state.loop_count
    }

    /// Total tokens (prompt + completion) reported over the conversation's life.
    pub fn total_tokens(&self) -> u64 {
        self.state.usage.lifetime_prompt_tokens + self.state.usage.lifetime_completion_tokens
    }
}
