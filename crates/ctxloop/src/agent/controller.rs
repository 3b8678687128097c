//! The execution loop: a `Plan → Act → [Compress] → Finalize` state machine.
//!
//! [`LoopController`] owns nothing but configuration. Each call to
//! [`run`](LoopController::run) takes exclusive ownership of one
//! [`ConversationState`] and drives it to `Finalize`:
//!
//! - **Plan**: stop if `loop_count >= max_loop_count`. If usage is critical
//!   and no compression ran since the last model call, go to `Compress`
//!   without calling the model. Otherwise invoke the model, record its token
//!   usage, and go to `Act` (tool calls requested) or `Finalize`.
//! - **Act**: answer each requested call (see [`execution`](super::execution)),
//!   then increment `loop_count`.
//! - **Compress**: run the [`ContextCompressor`], mark the turn as
//!   compressed, return to `Plan`.
//! - **Finalize**: hand the history to the [`Finalizer`].
//!
//! `loop_count` only moves in `Act`, so compression never spends iteration
//! budget, and the run always ends within `max_loop_count` `Act` steps.

use super::approval::{AllowAll, ApprovalGate};
use super::checkpoint::CheckpointStore;
use super::config::LoopConfig;
use super::events::{EventHandler, LoopEvent, LoopResult, NoopHandler, Termination};
use super::execution::{execute_pending_calls, save_checkpoint};
use super::finalize::{FinalizeRequest, Finalizer, ModelFinalizer};
use super::state::ConversationState;
use crate::ToolDef;
use crate::api::ModelClient;
use crate::context::{ContextCompressor, ModelSummarizer, Summarizer, UsageLevel};
use crate::error::LoopError;
use crate::message::Message;
use crate::tools::core::ToolExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

// ── Phases ─────────────────────────────────────────────────────────

/// States of the loop. `Finalize` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Plan,
    Act,
    Compress,
    Finalize,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::Plan => write!(f, "plan"),
            LoopPhase::Act => write!(f, "act"),
            LoopPhase::Compress => write!(f, "compress"),
            LoopPhase::Finalize => write!(f, "finalize"),
        }
    }
}

/// How a history that reached `Finalize` ended: on a text-only AI turn,
/// or anywhere else (which only the loop limit can cause).
fn termination_of(state: &ConversationState) -> Termination {
    match state.messages.last() {
        Some(Message::Ai { tool_calls, .. }) if tool_calls.is_empty() => Termination::Completed,
        _ => Termination::LoopLimit,
    }
}

/// Bookkeeping for one `run`/`resume` invocation.
struct RunTracker {
    sequence: u64,
    compressions: u32,
    level: UsageLevel,
}

// ── LoopController ─────────────────────────────────────────────────

/// Drives conversations through the loop.
///
/// ```ignore
/// let client = OpenRouterClient::new(api_key)?;
/// let tools = ToolSet::new().with(ThinkTool).with(TodoTool);
/// let store = FileCheckpointStore::new(".ctxloop/checkpoints")?;
///
/// let controller = LoopController::new(&client, &tools, LoopConfig::default())
///     .with_checkpoint_store(&store)
///     .with_event_handler(&LoggingHandler);
///
/// let state = controller.new_state(vec![Message::human("Summarize src/")]);
/// let result = controller.run(state).await?;
/// println!("{}", result.final_text);
/// ```
///
/// # Lifetimes
///
/// `LoopController<'a>` borrows every collaborator. Bind them to `let`
/// bindings before building the controller.
pub struct LoopController<'a> {
    model: &'a dyn ModelClient,
    tools: &'a dyn ToolExecutor,
    config: LoopConfig,
    summarizer: Option<&'a dyn Summarizer>,
    finalizer: &'a dyn Finalizer,
    checkpoints: Option<&'a dyn CheckpointStore>,
    approval: &'a dyn ApprovalGate,
    event_handler: &'a dyn EventHandler,
}

impl<'a> LoopController<'a> {
    /// A controller with the default finalizer, no checkpoint store, no
    /// approval restrictions, and no event handler. Summarization goes
    /// through `model` unless [`with_summarizer`](Self::with_summarizer) is set.
    pub fn new(model: &'a dyn ModelClient, tools: &'a dyn ToolExecutor, config: LoopConfig) -> Self {
        Self {
            model,
            tools,
            config,
            summarizer: None,
            finalizer: &ModelFinalizer,
            checkpoints: None,
            approval: &AllowAll,
            event_handler: &NoopHandler,
        }
    }

    pub fn with_summarizer(mut self, summarizer: &'a dyn Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_finalizer(mut self, finalizer: &'a dyn Finalizer) -> Self {
        self.finalizer = finalizer;
        self
    }

    pub fn with_checkpoint_store(mut self, store: &'a dyn CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn with_approval_gate(mut self, gate: &'a dyn ApprovalGate) -> Self {
        self.approval = gate;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// A fresh root conversation sized by this controller's config.
    pub fn new_state(&self, messages: Vec<Message>) -> ConversationState {
        ConversationState::new(
            messages,
            self.config.max_loop_count,
            self.config.context_window_tokens,
        )
    }

    /// Drive `state` from `Plan` to `Finalize`.
    ///
    /// The only error a started run returns is
    /// [`LoopError::CollaboratorUnavailable`]; the last checkpoint written
    /// before the failure is left in place for [`resume`](Self::resume).
    pub async fn run(&self, state: ConversationState) -> Result<LoopResult, LoopError> {
        self.config.validate()?;
        info!(
            "Loop run started: context_id={}, max_loop_count={}, messages={}",
            state.context_id,
            state.max_loop_count,
            state.messages.len()
        );
        let sequence = self.latest_sequence(&state.context_id)?;
        let mut tracker = self.tracker_for(&state, sequence);
        self.checkpoint(&state, LoopPhase::Plan, &mut tracker)?;
        self.drive(state, LoopPhase::Plan, tracker).await
    }

    /// Continue a conversation from its latest checkpoint.
    pub async fn resume(&self, context_id: &str) -> Result<LoopResult, LoopError> {
        self.config.validate()?;
        let store = self
            .checkpoints
            .ok_or_else(|| LoopError::checkpoint("no checkpoint store configured"))?;
        let checkpoint = store
            .load(context_id)
            .map_err(LoopError::checkpoint)?
            .ok_or_else(|| LoopError::NotFound(context_id.to_string()))?;

        info!(
            "Resuming context_id={} at {} (loop {}/{})",
            context_id,
            checkpoint.next_phase,
            checkpoint.state.loop_count,
            checkpoint.state.max_loop_count
        );
        self.event_handler.on_event(&LoopEvent::CheckpointResumed {
            context_id,
            loop_count: checkpoint.state.loop_count,
            next_phase: checkpoint.next_phase,
        });
        let tracker = self.tracker_for(&checkpoint.state, checkpoint.sequence);
        self.drive(checkpoint.state, checkpoint.next_phase, tracker)
            .await
    }

    /// Where checkpoint numbering continues for `context_id`, so a second
    /// run of a saved conversation never writes below its latest save.
    fn latest_sequence(&self, context_id: &str) -> Result<u64, LoopError> {
        match self.checkpoints {
            Some(store) if self.config.checkpointing => Ok(store
                .latest_sequence(context_id)
                .map_err(LoopError::checkpoint)?
                .unwrap_or(0)),
            _ => Ok(0),
        }
    }

    fn tracker_for(&self, state: &ConversationState, sequence: u64) -> RunTracker {
        RunTracker {
            sequence,
            compressions: 0,
            level: state.usage.classify(&self.config.thresholds),
        }
    }

    fn checkpoint(
        &self,
        state: &ConversationState,
        next_phase: LoopPhase,
        tracker: &mut RunTracker,
    ) -> Result<(), LoopError> {
        match self.checkpoints {
            Some(store) if self.config.checkpointing => save_checkpoint(
                store,
                self.event_handler,
                state,
                next_phase,
                &mut tracker.sequence,
            ),
            _ => Ok(()),
        }
    }

    async fn drive(
        &self,
        mut state: ConversationState,
        start: LoopPhase,
        mut tracker: RunTracker,
    ) -> Result<LoopResult, LoopError> {
        let tool_defs = self.tools.schemas();
        let mut phase = start;

        while phase != LoopPhase::Finalize {
            let usage = state.usage.context_usage();
            self.event_handler.on_event(&LoopEvent::PhaseEntered {
                phase,
                loop_count: state.loop_count,
                max_loop_count: state.max_loop_count,
                context_usage: &usage,
            });

            phase = match phase {
                LoopPhase::Plan => self.plan(&mut state, &tool_defs, &mut tracker).await?,
                LoopPhase::Act => {
                    execute_pending_calls(self.tools, self.approval, self.event_handler, &mut state)
                        .await;
                    LoopPhase::Plan
                }
                LoopPhase::Compress => self.compress(&mut state, &mut tracker).await,
                LoopPhase::Finalize => LoopPhase::Finalize,
            };
            self.checkpoint(&state, phase, &mut tracker)?;
        }

        self.finalize(state, tracker).await
    }

    /// The `Plan` step. Returns the next phase.
    async fn plan(
        &self,
        state: &mut ConversationState,
        tool_defs: &[ToolDef],
        tracker: &mut RunTracker,
    ) -> Result<LoopPhase, LoopError> {
        if state.loop_limit_reached() {
            self.event_handler.on_event(&LoopEvent::LoopLimitReached {
                max_loop_count: state.max_loop_count,
            });
            return Ok(LoopPhase::Finalize);
        }

        if !state.compression_performed_this_turn
            && state.usage.classify(&self.config.thresholds) == UsageLevel::Critical
        {
            state.compression_pending = true;
            self.event_handler.on_event(&LoopEvent::CompressionStarted {
                messages: state.messages.len(),
            });
            return Ok(LoopPhase::Compress);
        }

        let response = self
            .model
            .invoke(&state.messages, tool_defs)
            .await
            .map_err(LoopError::model)?;
        state.compression_performed_this_turn = false;

        state
            .usage
            .record_usage(response.prompt_tokens, response.completion_tokens);
        self.event_handler.on_event(&LoopEvent::TokenUsage {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        });
        self.note_usage_level(state, tracker);

        if let Some(text) = response.content.as_deref().filter(|t| !t.trim().is_empty()) {
            self.event_handler.on_event(&LoopEvent::Text(text));
        }

        state.messages.push(response.to_message());
        if response.has_tool_calls() {
            self.event_handler.on_event(&LoopEvent::ToolCallsReceived {
                loop_count: state.loop_count,
                count: response.tool_calls.len(),
            });
            Ok(LoopPhase::Act)
        } else {
            Ok(LoopPhase::Finalize)
        }
    }

    /// The `Compress` step. Never fails; always returns to `Plan`.
    async fn compress(&self, state: &mut ConversationState, tracker: &mut RunTracker) -> LoopPhase {
        let model_summarizer;
        let summarizer: &dyn Summarizer = match self.summarizer {
            Some(s) => s,
            None => {
                model_summarizer = ModelSummarizer::new(self.model);
                &model_summarizer
            }
        };
        let compressor = ContextCompressor::new(summarizer, self.config.thresholds.clone())
            .with_context_window(state.usage.context_window_tokens)
            .with_chars_per_token(self.config.chars_per_token)
            .with_summarizer_timeout(self.config.summarizer_timeout());

        let (messages, report) = compressor.compress(&state.messages).await;
        self.event_handler
            .on_event(&LoopEvent::Compressed { report: &report });

        if report.changed() {
            state.messages = messages;
            state.usage.rebase_after_compression(report.tokens_after);
            tracker.compressions += 1;
            self.note_usage_level(state, tracker);
        } else {
            debug!("Compression left {} unchanged", state.context_id);
        }
        state.compression_pending = false;
        state.compression_performed_this_turn = true;
        LoopPhase::Plan
    }

    fn note_usage_level(&self, state: &ConversationState, tracker: &mut RunTracker) {
        let level = state.usage.classify(&self.config.thresholds);
        if level != tracker.level {
            self.event_handler.on_event(&LoopEvent::UsageLevelChanged {
                from: tracker.level,
                to: level,
            });
            tracker.level = level;
        }
    }

    /// Keep only the newest checkpoints of a finalized run. A failure is
    /// logged and leaves the result alone.
    fn prune_checkpoints(&self, context_id: &str) {
        if self.config.checkpointing
            && let Some(store) = self.checkpoints
            && let Some(keep_last) = self.config.cleanup_on_success.get()
            && let Err(e) = store.cleanup(context_id, *keep_last)
        {
            warn!("Failed to clean up checkpoints for {context_id}: {e}");
        }
    }

    async fn finalize(
        &self,
        mut state: ConversationState,
        tracker: RunTracker,
    ) -> Result<LoopResult, LoopError> {
        let termination = termination_of(&state);
        let final_text = self
            .finalizer
            .finalize(FinalizeRequest {
                state: &state,
                termination,
                model: self.model,
                prompt: &self.config.finalize_prompt,
            })
            .await
            .map_err(LoopError::finalizer)?;

        // A forced stop's answer was produced outside the loop; record it so
        // the history ends on the text the caller sees.
        if termination == Termination::LoopLimit {
            state.messages = crate::context::curator::clean(&state.messages);
            state.messages.push(Message::ai_text(final_text.clone()));
        }

        self.prune_checkpoints(&state.context_id);
        self.event_handler
            .on_event(&LoopEvent::Finished { termination });
        info!(
            "Loop run finished: context_id={}, termination={}, loops={}, compressions={}, {}",
            state.context_id,
            termination,
            state.loop_count,
            tracker.compressions,
            state.usage.context_usage().to_log_string()
        );

        Ok(LoopResult {
            final_text,
            termination,
            compressions: tracker.compressions,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::approval::ToolPolicyGate;
    use crate::agent::checkpoint::{Checkpoint, MemoryCheckpointStore};
    use crate::agent::config::Toggle;
    use crate::agent::session::FileCheckpointStore;
    use crate::agent::events::FnEventHandler;
    use crate::api::ModelResponse;
    use crate::context::CompressionThresholds;
    use crate::context::curator::is_well_paired;
    use crate::error::{CheckpointError, Collaborator};
    use crate::message::ToolCallRequest;
    use crate::test_support::{
        FailingModel, ScriptedModel, StaticSummarizer, long_transcript, tool_call,
    };
    use crate::tools::core::{ThinkTool, TodoTool, ToolSet};
    use std::sync::Mutex;

    fn tools() -> ToolSet {
        ToolSet::new().with(ThinkTool).with(TodoTool)
    }

    fn think(call_id: &str) -> ModelResponse {
        tool_call(call_id, "think", r#"{"reasoning":"hmm"}"#)
    }

    /// Records phase entries.
    fn phase_recorder(phases: &Mutex<Vec<LoopPhase>>) -> FnEventHandler<impl Fn(&LoopEvent<'_>) + Send + Sync + '_> {
        FnEventHandler::new(move |event| {
            if let LoopEvent::PhaseEntered { phase, .. } = event {
                phases.lock().unwrap().push(*phase);
            }
        })
    }

    fn compressing_config() -> LoopConfig {
        LoopConfig::default()
            .with_context_window(1_000)
            .with_thresholds(
                CompressionThresholds::default()
                    .with_keep_recent_messages(4)
                    .with_keep_recent_ratio(0.0)
                    .with_keep_recent_window_floor(0),
            )
    }

    struct BrokenStore;

    impl CheckpointStore for BrokenStore {
        fn save(&self, _: &str, _: &Checkpoint) -> Result<(), CheckpointError> {
            Err(CheckpointError::Unavailable("disk gone".into()))
        }
        fn load(&self, _: &str) -> Result<Option<Checkpoint>, CheckpointError> {
            Err(CheckpointError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn text_answer_completes_in_one_plan() {
        let model = ScriptedModel::new(vec![ModelResponse::text("42").with_usage(50, 2)]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default());

        let result = controller
            .run(controller.new_state(vec![Message::human("question")]))
            .await
            .unwrap();
        assert_eq!(result.final_text, "42");
        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.loop_count(), 0);
        assert_eq!(result.total_tokens(), 52);
        assert_eq!(model.requests()[0].tools, vec!["think", "todo_write"]);
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let model = ScriptedModel::new(vec![think("c1"), ModelResponse::text("done")]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default());

        let result = controller
            .run(controller.new_state(vec![Message::human("go")]))
            .await
            .unwrap();
        assert_eq!(result.final_text, "done");
        assert_eq!(result.loop_count(), 1);
        assert!(is_well_paired(&result.state.messages));
        // human, ai(call), result, ai(text)
        assert_eq!(result.state.messages.len(), 4);
    }

    #[tokio::test]
    async fn critical_usage_compresses_before_calling_model() {
        let model = ScriptedModel::new(vec![ModelResponse::text("after compression")]);
        let summarizer = StaticSummarizer::new("earlier work summarized");
        let tools = tools();
        let phases = Mutex::new(Vec::new());
        let handler = phase_recorder(&phases);
        let controller = LoopController::new(&model, &tools, compressing_config())
            .with_summarizer(&summarizer)
            .with_event_handler(&handler);

        let mut state = controller.new_state(long_transcript(20, 100));
        state.usage.record_usage(960, 0);
        assert_eq!(state.usage.usage_ratio(), 0.96);

        let result = controller.run(state).await.unwrap();
        assert_eq!(
            *phases.lock().unwrap(),
            vec![LoopPhase::Plan, LoopPhase::Compress, LoopPhase::Plan]
        );
        assert_eq!(summarizer.call_count(), 1);
        assert_eq!(model.call_count(), 1);
        assert_eq!(result.compressions, 1);

        // The only model call saw the compressed history.
        let sent = &model.requests()[0].messages;
        assert_eq!(sent.len(), 6);
        assert!(sent[1].is_synthetic());
        assert!(!result.state.compression_pending);
        assert!(result.state.usage.usage_ratio() < 0.95);
    }

    #[tokio::test]
    async fn one_compression_per_turn_even_if_still_critical() {
        // A skipped compression leaves usage critical; the next Plan must
        // call the model instead of compressing again.
        let model = ScriptedModel::new(vec![ModelResponse::text("ok").with_usage(990, 1)]);
        let tools = tools();
        let summarizer = StaticSummarizer::new("s");
        let config = compressing_config().with_thresholds(
            CompressionThresholds::default().with_min_messages_to_compress(100),
        );
        let controller = LoopController::new(&model, &tools, config).with_summarizer(&summarizer);

        let mut state = controller.new_state(vec![Message::human("q")]);
        state.usage.record_usage(999, 0);
        let result = controller.run(state).await.unwrap();

        assert_eq!(model.call_count(), 1);
        assert_eq!(summarizer.call_count(), 0);
        assert_eq!(result.compressions, 0);
        assert_eq!(result.final_text, "ok");
    }

    #[tokio::test]
    async fn loop_limit_goes_to_finalize_not_act() {
        let model = ScriptedModel::repeating(think("c"));
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default());

        let mut state = ConversationState::new(vec![Message::human("q")], 5, 200_000);
        state.loop_count = 5;
        let result = controller.run(state).await.unwrap();

        assert_eq!(result.termination, Termination::LoopLimit);
        assert_eq!(result.loop_count(), 5);
        // The single model call is the finalizer's, offered no tools.
        assert_eq!(model.call_count(), 1);
        assert!(model.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn always_calling_model_terminates_within_limit() {
        let model = ScriptedModel::repeating(think("c"));
        let tools = tools();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default().with_max_loop_count(3));

        let result = controller
            .run(controller.new_state(vec![Message::human("loop forever")]))
            .await
            .unwrap();
        assert_eq!(result.termination, Termination::LoopLimit);
        assert_eq!(result.loop_count(), 3);
        // Three planning calls plus one finalize call.
        assert_eq!(model.call_count(), 4);
        assert!(is_well_paired(&result.state.messages));
        assert!(matches!(
            result.state.messages.last(),
            Some(Message::Ai { tool_calls, .. }) if tool_calls.is_empty()
        ));
    }

    #[tokio::test]
    async fn model_failure_is_collaborator_unavailable() {
        let model = FailingModel::new("connection refused");
        let tools = tools();
        let store = MemoryCheckpointStore::new();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default()).with_checkpoint_store(&store);

        let state = controller.new_state(vec![Message::human("q")]);
        let id = state.context_id.clone();
        let err = controller.run(state).await.unwrap_err();
        assert_eq!(err.collaborator(), Some(Collaborator::Model));

        // The checkpoint taken before the failed call is still there.
        let saved = store.load(&id).unwrap().unwrap();
        assert_eq!(saved.next_phase, LoopPhase::Plan);
        assert_eq!(saved.state.messages.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_failure_is_collaborator_unavailable() {
        let model = ScriptedModel::new(vec![ModelResponse::text("hi")]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default())
            .with_checkpoint_store(&BrokenStore);

        let err = controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap_err();
        assert_eq!(err.collaborator(), Some(Collaborator::CheckpointStore));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn checkpointing_can_be_disabled() {
        let model = ScriptedModel::new(vec![ModelResponse::text("hi")]);
        let tools = tools();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default().with_checkpointing(false))
                .with_checkpoint_store(&BrokenStore);
        let result = controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap();
        assert_eq!(result.final_text, "hi");
    }

    #[tokio::test]
    async fn approval_block_is_reported_to_model() {
        let model = ScriptedModel::new(vec![think("c1"), ModelResponse::text("fine")]);
        let tools = tools();
        let gate = ToolPolicyGate::new().block("think");
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default()).with_approval_gate(&gate);

        let result = controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap();
        assert_eq!(result.final_text, "fine");
        let refusal = result.state.messages[2].text().unwrap();
        assert!(refusal.starts_with("Tool 'think' was denied"));
        // The second model call saw the refusal.
        assert_eq!(model.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn resume_continues_at_saved_phase() {
        let store = MemoryCheckpointStore::new();
        let mut state = ConversationState::new(vec![Message::human("q")], 5, 200_000);
        state.messages.push(Message::ai_tool_calls(
            None,
            vec![ToolCallRequest::new("c1", "think", r#"{"reasoning":"resumed"}"#)],
        ));
        let id = state.context_id.clone();
        store
            .save(&id, &Checkpoint::new(7, LoopPhase::Act, state))
            .unwrap();

        let model = ScriptedModel::new(vec![ModelResponse::text("finished after resume")]);
        let tools = tools();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default()).with_checkpoint_store(&store);

        let result = controller.resume(&id).await.unwrap();
        assert_eq!(result.final_text, "finished after resume");
        assert_eq!(result.loop_count(), 1);
        assert_eq!(result.state.messages[2].text(), Some("resumed"));
        let latest = store.load(&id).unwrap().unwrap();
        assert!(latest.sequence > 7);
        assert_eq!(latest.next_phase, LoopPhase::Finalize);
    }

    fn checkpoint_file_count(root: &std::path::Path, context_id: &str) -> usize {
        std::fs::read_dir(root.join(context_id))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("checkpoint-"))
            .count()
    }

    #[tokio::test]
    async fn rerun_continues_checkpoint_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let model = ScriptedModel::new(vec![
            think("c1"),
            ModelResponse::text("first answer"),
            ModelResponse::text("second answer"),
        ]);
        let tools = tools();
        let config = LoopConfig::default().with_cleanup_on_success(Toggle::disabled());
        let controller = LoopController::new(&model, &tools, config).with_checkpoint_store(&store);

        let first = controller
            .run(controller.new_state(vec![Message::human("start")]))
            .await
            .unwrap();
        let first_seq = store.latest_sequence(&first.state.context_id).unwrap().unwrap();

        let mut state = first.state;
        state.messages.push(Message::human("one more thing"));
        let second = controller.run(state).await.unwrap();
        assert_eq!(second.final_text, "second answer");

        let latest = store.load(&second.state.context_id).unwrap().unwrap();
        assert!(latest.sequence > first_seq);
        assert_eq!(latest.state.messages, second.state.messages);
        assert_eq!(latest.state.last_ai_text(), Some("second answer"));
    }

    #[tokio::test]
    async fn finalize_prunes_old_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let model = ScriptedModel::new(vec![think("c1"), think("c2"), ModelResponse::text("done")]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default())
            .with_checkpoint_store(&store);

        let result = controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap();
        let id = &result.state.context_id;
        assert_eq!(checkpoint_file_count(dir.path(), id), 1);
        let latest = store.load(id).unwrap().unwrap();
        assert_eq!(latest.next_phase, LoopPhase::Finalize);
        assert_eq!(latest.state.messages, result.state.messages);
    }

    #[tokio::test]
    async fn pruning_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let model = ScriptedModel::new(vec![think("c1"), ModelResponse::text("done")]);
        let tools = tools();
        let config = LoopConfig::default().with_cleanup_on_success(Toggle::disabled());
        let controller = LoopController::new(&model, &tools, config).with_checkpoint_store(&store);

        let result = controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap();
        // start, then Act, Plan, Finalize
        assert_eq!(checkpoint_file_count(dir.path(), &result.state.context_id), 4);
    }

    #[tokio::test]
    async fn resume_unknown_context_is_not_found() {
        let store = MemoryCheckpointStore::new();
        let model = ScriptedModel::new(vec![]);
        let tools = tools();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default()).with_checkpoint_store(&store);
        assert!(matches!(
            controller.resume("ctx-nope").await,
            Err(LoopError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn resume_without_store_is_unavailable() {
        let model = ScriptedModel::new(vec![]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default());
        let err = controller.resume("ctx-any").await.unwrap_err();
        assert_eq!(err.collaborator(), Some(Collaborator::CheckpointStore));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_running() {
        let model = ScriptedModel::new(vec![]);
        let tools = tools();
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default().with_context_window(0));
        let err = controller
            .run(ConversationState::new(vec![], 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Config(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn todo_list_tracks_latest_write() {
        let model = ScriptedModel::new(vec![
            tool_call(
                "t1",
                "todo_write",
                r#"{"todos":[{"description":"step","status":"pending"}]}"#,
            ),
            ModelResponse::text("done"),
        ]);
        let tools = tools();
        let controller = LoopController::new(&model, &tools, LoopConfig::default());
        let result = controller
            .run(controller.new_state(vec![Message::human("plan it")]))
            .await
            .unwrap();
        assert_eq!(result.state.todo_list.len(), 1);
        assert_eq!(result.state.todo_list[0].description, "step");
    }

    #[tokio::test]
    async fn usage_level_changes_are_reported() {
        let model = ScriptedModel::new(vec![
            think("c1").with_usage(700, 5),
            ModelResponse::text("done").with_usage(150, 5),
        ]);
        let tools = tools();
        let levels = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            if let LoopEvent::UsageLevelChanged { to, .. } = event {
                levels.lock().unwrap().push(*to);
            }
        });
        let controller =
            LoopController::new(&model, &tools, LoopConfig::default().with_context_window(1_000))
                .with_event_handler(&handler);

        controller
            .run(controller.new_state(vec![Message::human("q")]))
            .await
            .unwrap();
        // 700/1000 = info, then 850/1000 = warning.
        assert_eq!(
            *levels.lock().unwrap(),
            vec![UsageLevel::Info, UsageLevel::Warning]
        );
    }
}
