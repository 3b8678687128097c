//! Agent runtime: the [`LoopController`] execution loop and its supporting
//! modules.
//!
//! - [`controller::LoopController`]: the `Plan → Act → [Compress] → Finalize`
//!   state machine. Start here.
//! - [`config::LoopConfig`]: loop ceiling, context window, thresholds,
//!   timeouts, subagent settings.
//! - [`state`]: [`ConversationState`], the unit of execution.
//! - [`events`]: [`EventHandler`] and [`LoopEvent`] for observing a run.
//!   Includes [`LoggingHandler`], [`CompositeEventHandler`],
//!   [`FnEventHandler`], and [`ToolResultHandler`].
//! - [`approval`]: gate consulted before every tool call.
//! - [`checkpoint`] and [`session`]: durable phase-boundary snapshots and
//!   resume.
//! - [`finalize`]: produces the user-visible answer.
//! - [`sub_agent`]: delegated tasks in isolated child conversations.

pub mod approval;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod events;
mod execution;
pub mod finalize;
pub mod session;
pub mod state;
pub mod sub_agent;

// Re-export commonly used items at the module level.
pub use approval::{AllowAll, ApprovalDecision, ApprovalGate, FnApprovalGate, ToolPolicyGate};
pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
pub use config::{LoopConfig, SubagentConfig, Toggle};
pub use controller::{LoopController, LoopPhase};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, LoopEvent, LoopResult,
    NoopHandler, Termination, ToolResultHandler,
};
pub use finalize::{Finalizer, ModelFinalizer};
pub use session::{ContextManifest, FileCheckpointStore};
pub use state::{ConversationState, TodoItem, TodoStatus};
pub use sub_agent::{DelegateTool, SubagentIsolator};
