//! Subagent delegation.
//!
//! A delegated task runs in a brand-new [`ConversationState`] under its own
//! [`LoopController`]: fresh `context_id`, a `parent_context_id` link, one
//! human message holding the task, zeroed counters, and a tool set built
//! anew by the factory. Nothing flows back to the caller except the child's
//! final text, which [`DelegateTool`] hands to the parent as a single tool
//! result.
//!
//! Nesting is bounded: a child at `max_depth` is not given a
//! [`DelegateTool`] at all.

use super::config::LoopConfig;
use super::controller::LoopController;
use super::events::LoopResult;
use super::state::ConversationState;
use crate::ToolDef;
use crate::api::ModelClient;
use crate::error::{LoopError, ToolError};
use crate::message::Message;
use crate::tools::core::{Tool, ToolContext, ToolFuture, ToolSet, parse_tool_args};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name under which [`DelegateTool`] is offered to the model.
pub const DELEGATE_TOOL_NAME: &str = "delegate_task";

/// Builds the tool set a child conversation starts with.
pub type ToolFactory = Arc<dyn Fn() -> ToolSet + Send + Sync>;

// ── SubagentIsolator ───────────────────────────────────────────────

/// Runs delegated tasks as independent loop instances.
///
/// `depth` is the nesting level of the conversation that *owns* this
/// isolator (0 for the root); its children run at `depth + 1`.
#[derive(Clone)]
pub struct SubagentIsolator {
    model: Arc<dyn ModelClient>,
    tools: ToolFactory,
    config: LoopConfig,
    depth: u32,
}

impl SubagentIsolator {
    /// An isolator for a root conversation.
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: impl Fn() -> ToolSet + Send + Sync + 'static,
        config: LoopConfig,
    ) -> Self {
        Self {
            model,
            tools: Arc::new(tools),
            config,
            depth: 0,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether conversations owned by this isolator may delegate.
    pub fn can_delegate(&self) -> bool {
        self.depth < self.config.subagent.max_depth
    }

    /// The isolator a child conversation uses for its own delegations.
    fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    /// Tool set for a child: the factory's tools, plus delegation when the
    /// child is still below `max_depth`.
    fn child_tools(&self) -> ToolSet {
        let nested = self.nested();
        (self.tools)().with_if(nested.can_delegate(), DelegateTool::new(nested))
    }

    /// Run `task` to completion in a fresh child conversation and return its
    /// final text.
    ///
    /// `max_loop_count` can lower the configured subagent ceiling, never
    /// raise it.
    pub async fn delegate(
        &self,
        parent_context_id: &str,
        task: &str,
        max_loop_count: Option<u32>,
    ) -> Result<String, LoopError> {
        self.run_child(parent_context_id, task, max_loop_count)
            .await
            .map(|result| result.final_text)
    }

    /// Like [`delegate`](Self::delegate), but returns the child's full result.
    pub async fn run_child(
        &self,
        parent_context_id: &str,
        task: &str,
        max_loop_count: Option<u32>,
    ) -> Result<LoopResult, LoopError> {
        let ceiling = self.config.subagent.max_loop_count;
        let max_loop_count = max_loop_count.map_or(ceiling, |n| n.min(ceiling)).max(1);
        let state = ConversationState::child(
            parent_context_id,
            task,
            max_loop_count,
            self.config.context_window_tokens,
        );
        info!(
            "Spawning subagent {} (parent={}, depth={}, max_loop_count={})",
            state.context_id,
            parent_context_id,
            self.depth + 1,
            max_loop_count
        );

        let tools = self.child_tools();
        let controller = LoopController::new(self.model.as_ref(), &tools, self.config.clone());
        let result = controller.run(state).await?;

        let min_chars = self.config.subagent.min_result_chars;
        let Some(prompt) = self.config.subagent.continuation.get() else {
            return Ok(result);
        };
        if result.final_text.chars().count() >= min_chars {
            return Ok(result);
        }

        debug!(
            "Subagent {} answer is {} chars (< {min_chars}); asking once for more",
            result.state.context_id,
            result.final_text.chars().count()
        );
        let short_text = result.final_text;
        let first_compressions = result.compressions;
        let mut state = result.state;
        state.messages.push(Message::synthetic_human(prompt.as_str()));
        state.max_loop_count = state.loop_count + 1;

        let mut retry = controller.run(state).await?;
        retry.compressions += first_compressions;
        if retry.final_text.trim().is_empty() {
            warn!(
                "Subagent {} continuation was empty; keeping first answer",
                retry.state.context_id
            );
            retry.final_text = short_text;
        }
        Ok(retry)
    }
}

// ── DelegateTool ───────────────────────────────────────────────────

/// Typed arguments for the `delegate_task` tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct DelegateArgs {
    /// The task for the subagent. It starts with no access to this
    /// conversation, so include everything it needs to know.
    pub task: String,
    /// Optional loop ceiling for the subagent, capped by the configured one.
    #[serde(default)]
    pub max_loop_count: Option<u32>,
}

/// Exposes [`SubagentIsolator::delegate`] to the model.
///
/// The calling conversation's `context_id` becomes the child's
/// `parent_context_id`. A tool set timeout does not apply to it.
pub struct DelegateTool {
    isolator: SubagentIsolator,
}

impl DelegateTool {
    pub fn new(isolator: SubagentIsolator) -> Self {
        Self { isolator }
    }
}

impl Tool for DelegateTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            DELEGATE_TOOL_NAME,
            "Delegate a self-contained subtask to a subagent with a fresh context. \
             The subagent sees only the task text you give it and returns a single \
             final report. Use this for work whose intermediate steps you do not \
             need in this conversation.",
            crate::json_schema_for::<DelegateArgs>(),
        )
    }

    fn execute<'a>(&'a self, ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: DelegateArgs = parse_tool_args(DELEGATE_TOOL_NAME, arguments)?;
            self.isolator
                .delegate(&ctx.context_id, &args.task, args.max_loop_count)
                .await
                .map_err(|e| ToolError::Failed(format!("subagent failed: {e}")))
        })
    }

    /// A child conversation is never cut off once started.
    fn interruptible(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::config::{SubagentConfig, Toggle};
    use crate::api::ModelResponse;
    use crate::context::CompressionThresholds;
    use crate::test_support::{FailingModel, ScriptedModel, tool_call};
    use crate::tools::core::{ThinkTool, ToolExecutor};
    use std::time::Duration;

    fn long_answer() -> String {
        format!("Report: {}", "finding ".repeat(40))
    }

    fn isolator(model: Arc<dyn ModelClient>, config: LoopConfig) -> SubagentIsolator {
        SubagentIsolator::new(model, || ToolSet::new().with(ThinkTool), config)
    }

    #[tokio::test]
    async fn parent_sees_only_the_child_result() {
        let child_answer = long_answer();
        let model = Arc::new(ScriptedModel::new(vec![
            tool_call("d1", DELEGATE_TOOL_NAME, r#"{"task":"inspect the logs"}"#),
            ModelResponse::text(child_answer.clone()),
            ModelResponse::text("parent done"),
        ]));
        let config = LoopConfig::default();
        let iso = isolator(model.clone(), config.clone());
        let tools = ToolSet::new().with(ThinkTool).with(DelegateTool::new(iso));
        let controller = LoopController::new(model.as_ref(), &tools, config);

        let result = controller
            .run(controller.new_state(vec![Message::human("investigate")]))
            .await
            .unwrap();
        assert_eq!(result.final_text, "parent done");

        // human, ai(delegate call), the child's answer, ai(text)
        let messages = &result.state.messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].answered_call_id(), Some("d1"));
        assert_eq!(messages[2].text(), Some(child_answer.as_str()));

        // The child started from the task alone.
        let child_request = &model.requests()[1];
        assert_eq!(child_request.messages, vec![Message::human("inspect the logs")]);
        assert!(child_request.tools.contains(&DELEGATE_TOOL_NAME.to_string()));
    }

    #[tokio::test]
    async fn child_links_to_parent_with_fresh_identity() {
        let model = Arc::new(ScriptedModel::new(vec![ModelResponse::text(long_answer())]));
        let iso = isolator(model, LoopConfig::default());

        let result = iso.run_child("ctx-parent", "task", Some(3)).await.unwrap();
        assert_eq!(result.state.parent_context_id.as_deref(), Some("ctx-parent"));
        assert_ne!(result.state.context_id, "ctx-parent");
        assert_eq!(result.state.max_loop_count, 3);
        assert_eq!(result.loop_count(), 0);
    }

    #[tokio::test]
    async fn requested_ceiling_cannot_exceed_config() {
        let model = Arc::new(ScriptedModel::repeating(ModelResponse::text(long_answer())));
        let iso = isolator(model, LoopConfig::default());

        let result = iso.run_child("p", "task", Some(u32::MAX)).await.unwrap();
        assert_eq!(result.state.max_loop_count, 8);
        let result = iso.run_child("p", "task", Some(0)).await.unwrap();
        assert_eq!(result.state.max_loop_count, 1);
    }

    #[tokio::test]
    async fn short_answer_gets_one_continuation() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelResponse::text("ok"),
            ModelResponse::text(long_answer()),
        ]));
        let iso = isolator(model.clone(), LoopConfig::default());

        let text = iso.delegate("ctx-parent", "task", None).await.unwrap();
        assert_eq!(text, long_answer());
        assert_eq!(model.call_count(), 2);

        let retry = &model.requests()[1];
        let last = retry.messages.last().unwrap();
        assert!(last.is_synthetic());
    }

    #[tokio::test]
    async fn continuation_keeps_first_pass_compressions() {
        let think = |id: &str, filler: &str| {
            let args = serde_json::json!({ "reasoning": filler.repeat(400) }).to_string();
            tool_call(id, "think", &args)
        };
        let model = Arc::new(ScriptedModel::new(vec![
            think("t1", "x").with_usage(100, 5),
            think("t2", "y").with_usage(960, 5),
            ModelResponse::text("survey summary"),
            ModelResponse::text("ok"),
            ModelResponse::text(long_answer()),
        ]));
        let config = LoopConfig::default().with_context_window(1_000).with_thresholds(
            CompressionThresholds::default()
                .with_keep_recent_messages(2)
                .with_keep_recent_ratio(0.0)
                .with_keep_recent_window_floor(0)
                .with_min_messages_to_compress(4),
        );
        let iso = isolator(model.clone(), config);

        let result = iso.run_child("p", "survey", None).await.unwrap();
        assert_eq!(model.call_count(), 5);
        assert_eq!(result.final_text, long_answer());
        assert_eq!(result.compressions, 1);
    }

    #[tokio::test]
    async fn continuation_is_bounded_to_one_retry() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelResponse::text("ok"),
            ModelResponse::text("still short"),
        ]));
        let iso = isolator(model.clone(), LoopConfig::default());

        let text = iso.delegate("ctx-parent", "task", None).await.unwrap();
        assert_eq!(text, "still short");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn continuation_can_be_disabled() {
        let model = Arc::new(ScriptedModel::new(vec![ModelResponse::text("ok")]));
        let config = LoopConfig::default().with_subagent(SubagentConfig {
            continuation: Toggle::disabled(),
            ..SubagentConfig::default()
        });
        let iso = isolator(model.clone(), config);

        assert_eq!(iso.delegate("p", "task", None).await.unwrap(), "ok");
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn depth_limit_removes_delegation() {
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModel::new(vec![]));
        let root = isolator(model, LoopConfig::default());
        assert!(root.can_delegate());
        assert!(root.child_tools().contains(DELEGATE_TOOL_NAME));

        let depth_one = root.nested();
        assert_eq!(depth_one.depth(), 1);
        assert!(!depth_one.child_tools().contains(DELEGATE_TOOL_NAME));
        assert!(depth_one.child_tools().contains("think"));
    }

    #[tokio::test]
    async fn slow_child_is_not_cut_off_by_tool_timeout() {
        let child_answer = long_answer();
        let child_model = Arc::new(
            ScriptedModel::new(vec![
                tool_call("t1", "think", r#"{"reasoning":"look around"}"#),
                ModelResponse::text(child_answer.clone()),
            ])
            .with_delay(Duration::from_millis(40)),
        );
        let tools = ToolSet::new()
            .with_default_timeout(Some(Duration::from_millis(20)))
            .with(DelegateTool::new(isolator(child_model, LoopConfig::default())));

        let ctx = ToolContext::new("ctx-parent", "d1");
        let out = tools
            .execute(&ctx, DELEGATE_TOOL_NAME, r#"{"task":"survey the repo"}"#)
            .await
            .unwrap();
        assert_eq!(out, child_answer);
    }

    #[tokio::test]
    async fn child_failure_becomes_tool_error() {
        let model: Arc<dyn ModelClient> = Arc::new(FailingModel::new("offline"));
        let tools = ToolSet::new().with(DelegateTool::new(isolator(model, LoopConfig::default())));

        let ctx = ToolContext::new("ctx-parent", "d1");
        let err = tools
            .execute(&ctx, DELEGATE_TOOL_NAME, r#"{"task":"x"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("subagent failed"));
    }
}
