//! The approval gate consulted before each tool call in `Act`.
//!
//! A [`ApprovalDecision::Block`] never aborts the loop. The call is answered
//! with a refusal [`ToolResult`](crate::message::Message::ToolResult) so the
//! model sees why it did not run and can choose another route.

use std::collections::BTreeSet;

/// Outcome of an approval check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Let the tool execute.
    Allow,
    /// Refuse the call. The reason is passed back to the model.
    Block(String),
}

/// Decides whether a tool call may run.
///
/// # Example
///
/// ```ignore
/// struct NoShell;
///
/// impl ApprovalGate for NoShell {
///     fn check(&self, tool: &str, _args: &str) -> ApprovalDecision {
///         if tool == "shell" {
///             ApprovalDecision::Block("Shell disabled.".into())
///         } else {
///             ApprovalDecision::Allow
///         }
///     }
/// }
/// ```
pub trait ApprovalGate: Send + Sync {
    fn check(&self, tool_name: &str, arguments: &str) -> ApprovalDecision;
}

/// Text of the tool result that replaces a refused call.
pub fn refusal_message(tool_name: &str, reason: &str) -> String {
    format!("Tool '{tool_name}' was denied: {reason}")
}

/// Allows everything.
pub struct AllowAll;

impl ApprovalGate for AllowAll {
    fn check(&self, _tool_name: &str, _arguments: &str) -> ApprovalDecision {
        ApprovalDecision::Allow
    }
}

/// Blocks a fixed set of tool names.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicyGate {
    blocked: BTreeSet<String>,
    reason: Option<String>,
}

impl ToolPolicyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block a tool by name (builder pattern).
    pub fn block(mut self, tool_name: impl Into<String>) -> Self {
        self.blocked.insert(tool_name.into());
        self
    }

    /// Reason reported for every blocked call.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_blocked(&self, tool_name: &str) -> bool {
        self.blocked.contains(tool_name)
    }
}

impl ApprovalGate for ToolPolicyGate {
    fn check(&self, tool_name: &str, _arguments: &str) -> ApprovalDecision {
        if !self.is_blocked(tool_name) {
            return ApprovalDecision::Allow;
        }
        ApprovalDecision::Block(
            self.reason
                .clone()
                .unwrap_or_else(|| "blocked by tool policy".into()),
        )
    }
}

/// An approval gate backed by a closure.
pub struct FnApprovalGate<F>(F)
where
    F: Fn(&str, &str) -> ApprovalDecision + Send + Sync;

impl<F> FnApprovalGate<F>
where
    F: Fn(&str, &str) -> ApprovalDecision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ApprovalGate for FnApprovalGate<F>
where
    F: Fn(&str, &str) -> ApprovalDecision + Send + Sync,
{
    fn check(&self, tool_name: &str, arguments: &str) -> ApprovalDecision {
        (self.0)(tool_name, arguments)
    }
}
