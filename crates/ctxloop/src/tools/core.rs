//! Tool abstraction and the tool-execution collaborator.
//!
//! The [`Tool`] trait defines what every tool provides: a static API
//! definition (name, description, JSON schema) and an async `execute`
//! method. Tools are collected into a [`ToolSet`], which is the stock
//! [`ToolExecutor`] the loop controller dispatches through. A `ToolSet`
//! handles lookup, argument validation, result truncation, and an opt-in
//! timeout.
//! Every failure comes back as a [`ToolError`]; the loop renders it into
//! ordinary tool-result text so the model can self-correct.

use crate::ToolDef;
use crate::agent::state::{TodoItem, format_todo_list};
use crate::error::ToolError;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Name of the todo-list tool whose calls are mirrored into conversation state.
pub const TODO_TOOL_NAME: &str = "todo_write";

/// Boxed future returned by [`Tool::execute`] and [`ToolExecutor::execute`].
pub type ToolFuture<'a> = BoxFuture<'a, Result<String, ToolError>>;

/// Identity of one tool call: which conversation asked, and which request
/// the result answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub context_id: String,
    pub call_id: String,
}

impl ToolContext {
    pub fn new(context_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            call_id: call_id.into(),
        }
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool that an LLM agent can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("clock", "Current UTC time", serde_json::json!({"type": "object"}))
///     }
///
///     fn execute<'a>(&'a self, _ctx: &'a ToolContext, _arguments: &'a str) -> ToolFuture<'a> {
///         Box::pin(async { Ok(chrono::Utc::now().to_rfc3339()) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Execute with the raw JSON arguments string.
    fn execute<'a>(&'a self, ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a>;

    /// The tool's name (delegates to the definition).
    fn name(&self) -> String {
        self.definition().function.name
    }

    /// Whether a [`ToolSet`] timeout may cancel this tool mid-run.
    fn interruptible(&self) -> bool {
        true
    }
}

/// The tool-execution collaborator consumed by the loop controller.
pub trait ToolExecutor: Send + Sync {
    /// Schemas of every callable tool, in a stable order.
    fn schemas(&self) -> Vec<ToolDef>;

    /// Run one tool call. Errors are reported, never thrown past the loop.
    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        name: &'a str,
        arguments: &'a str,
    ) -> ToolFuture<'a>;
}

/// Text the model sees when a tool call fails.
pub fn render_tool_error(err: &ToolError) -> String {
    format!("Error: {err}")
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with(ThinkTool)
///     .with(TodoTool);
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Validate arguments against the tool's JSON Schema before execution.
    validate_args: bool,
    /// Opt-in limit for interruptible tools. `None` lets every call run
    /// to completion.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolSet {
    /// An empty tool set with validation on and no timeout.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
            default_timeout: None,
        }
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Limit interruptible tools to `timeout`. Tools that report
    /// [`Tool::interruptible`] as `false` are never cut off.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register a tool only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor for ToolSet {
    fn schemas(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        name: &'a str,
        arguments: &'a str,
    ) -> ToolFuture<'a> {
        Box::pin(async move {
            let tool = self
                .tools
                .get(name)
                .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

            if self.validate_args {
                validate_tool_arguments(tool.as_ref(), arguments)?;
            }

            log_tool_call(name, arguments);
            let start = std::time::Instant::now();

            let limit = self.default_timeout.filter(|_| tool.interruptible());
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, tool.execute(ctx, arguments)).await
                {
                    Ok(r) => r,
                    Err(_) => {
                        info!(
                            "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                            start.elapsed().as_secs_f64(),
                            limit.as_secs_f64(),
                        );
                        Err(ToolError::Timeout {
                            tool: name.to_string(),
                            secs: limit.as_secs(),
                        })
                    }
                },
                None => tool.execute(ctx, arguments).await,
            };

            let output = result?;
            debug!(
                "Tool {name} completed in {:.0}ms ({} bytes)",
                start.elapsed().as_secs_f64() * 1000.0,
                output.len()
            );
            trace!(
                "Tool {name} result preview: {}",
                output.chars().take(300).collect::<String>()
            );
            Ok(truncate_result(output, self.max_result_bytes))
        })
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler =
    Box<dyn Fn(String) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// A closure-based tool that parses arguments and delegates to a handler.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs { text: String }
///
/// let echo = FnTool::new(
///     ToolDef::new("echo", "Echo text back", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(args.text) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let tool_name = def.function.name.clone();
        let erased = move |raw: String| -> BoxFuture<'static, Result<String, ToolError>> {
            match serde_json::from_str::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => {
                    let err = ToolError::InvalidArguments {
                        tool: tool_name.clone(),
                        message: e.to_string(),
                    };
                    Box::pin(async move { Err(err) })
                }
            }
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute<'a>(&'a self, _ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        (self.handler)(arguments.to_string())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against the tool's declared JSON Schema.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Result<(), ToolError> {
    let name = tool.name();
    let args_value: serde_json::Value =
        serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
            tool: name.clone(),
            message: format!("invalid JSON: {e}"),
        })?;

    let schema = tool.definition().function.parameters;
    // An invalid schema is the tool author's bug; skip validation rather than block the call.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments {
            tool: name,
            message: errors.join("; "),
        })
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate a string to at most `max` bytes (on a char boundary), appending
/// a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}...\n[truncated: {} bytes total]",
        s.get(..end).unwrap_or_default(),
        s.len()
    )
}

/// Parse raw JSON arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    tool: &str,
    arguments: &str,
) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

// ── Pseudo-tools ───────────────────────────────────────────────────

/// A no-op scratchpad tool that gives the model a structured way to reason
/// between steps. The input is returned unchanged.
pub struct ThinkTool;

/// Typed arguments for the `think` pseudo-tool.
#[derive(Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// Your step-by-step reasoning or analysis.
    pub reasoning: String,
}

impl Tool for ThinkTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "think",
            "Think through a problem step-by-step before acting. This is a \
             scratchpad; it does not perform any action.",
            crate::json_schema_for::<ThinkArgs>(),
        )
    }

    fn execute<'a>(&'a self, _ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ThinkArgs = parse_tool_args("think", arguments)?;
            Ok(args.reasoning)
        })
    }
}

/// Typed arguments for [`TodoTool`].
#[derive(Deserialize, JsonSchema)]
pub struct TodoWriteArgs {
    /// The complete, updated todo list. Replaces the previous list.
    pub todos: Vec<TodoItem>,
}

/// Replaces the conversation's todo list. The loop mirrors every successful
/// call into [`ConversationState::todo_list`](crate::agent::state::ConversationState::todo_list).
pub struct TodoTool;

impl Tool for TodoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            TODO_TOOL_NAME,
            "Record your plan as a todo list. Send the full list every time; \
             each item has a description and a status of pending, in_progress, \
             or completed.",
            crate::json_schema_for::<TodoWriteArgs>(),
        )
    }

    fn execute<'a>(&'a self, _ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: TodoWriteArgs = parse_tool_args(TODO_TOOL_NAME, arguments)?;
            Ok(format_todo_list(&args.todos))
        })
    }
}
