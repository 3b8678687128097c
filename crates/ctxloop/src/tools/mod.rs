//! Tool abstractions for the `Act` step.
//!
//! Every capability the model can call is a [`Tool`] implementor. Tools are
//! collected into a [`ToolSet`], the loop's [`ToolExecutor`], which handles
//! dispatch, schema validation, and truncation.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses arguments. Best for simple tools.
//! - **`impl Tool`**: full struct with manual [`Tool::definition()`] and
//!   [`Tool::execute()`]. Best for tools with state or that need the
//!   [`ToolContext`](core::ToolContext).
//!
//! Built in: [`ThinkTool`] (scratchpad) and [`TodoTool`] (`todo_write`,
//! mirrored into the conversation's todo list). Delegation lives in
//! [`agent::sub_agent`](crate::agent::sub_agent).

pub mod core;

// Re-export commonly used items at the module level.
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, ThinkTool, TodoTool, Tool, ToolContext, ToolExecutor,
    ToolFuture, ToolSet, parse_tool_args, truncate_result, validate_tool_arguments,
};
