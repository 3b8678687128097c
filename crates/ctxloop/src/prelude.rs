//! Convenience re-exports for common `ctxloop` types.
//!
//! Meant to be glob-imported when embedding the loop:
//!
//! ```ignore
//! use ctxloop::prelude::*;
//! ```
//!
//! This pulls in what most programs need: the [`OpenRouterClient`],
//! [`Message`] constructors, [`LoopController`] and its config, the [`Tool`]
//! trait and [`ToolSet`], event handlers, and checkpoint stores. Compressor and
//! curator internals are left out; import those from [`crate::context`].

// ── Core types ──────────────────────────────────────────────────────
pub use crate::api::{ModelClient, ModelResponse, OpenRouterClient};
pub use crate::error::LoopError;
pub use crate::{Message, ToolCallRequest, ToolDef, json_schema_for};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AllowAll, ApprovalDecision, ApprovalGate, CompositeEventHandler, ConversationState,
    DelegateTool, EventHandler, FileCheckpointStore, FnEventHandler, LoggingHandler, LoopConfig,
    LoopController, LoopEvent, LoopResult, MemoryCheckpointStore, NoopHandler, SubagentIsolator,
    Termination, ToolPolicyGate, ToolResultHandler,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{CompressionThresholds, UsageLevel};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, ThinkTool, TodoTool, Tool, ToolFuture, ToolSet, parse_tool_args};
