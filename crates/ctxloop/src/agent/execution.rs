//! Per-step mechanics for the [`LoopController`](super::controller::LoopController):
//! executing tool calls in `Act` and recording checkpoints at phase
//! boundaries.

use super::approval::{ApprovalDecision, ApprovalGate, refusal_message};
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::controller::LoopPhase;
use super::events::{EventHandler, LoopEvent};
use super::state::ConversationState;
use crate::error::LoopError;
use crate::message::{Message, ToolCallRequest};
use crate::tools::core::{
    TODO_TOOL_NAME, TodoWriteArgs, ToolContext, ToolExecutor, render_tool_error,
};
use tracing::{debug, info};

// ── Tool execution ────────────────────────────────────────────────

/// The `Act` step: answer every pending tool call of the last AI message,
/// in order, then count one loop iteration.
///
/// Blocked and failed calls still get a `ToolResult`, so the transcript
/// stays well paired and the model can react to the outcome. A call that
/// has started always runs to completion here; only the executor may
/// impose a limit.
pub(crate) async fn execute_pending_calls(
    tools: &dyn ToolExecutor,
    approval: &dyn ApprovalGate,
    event_handler: &dyn EventHandler,
    state: &mut ConversationState,
) {
    let calls = state.pending_tool_calls();
    debug!(
        "Act: {} pending call(s) for {} at loop {}",
        calls.len(),
        state.context_id,
        state.loop_count
    );

    for call in calls {
        let result = match approval.check(&call.name, &call.arguments) {
            ApprovalDecision::Block(reason) => {
                event_handler.on_event(&LoopEvent::ApprovalDenied {
                    name: &call.name,
                    reason: &reason,
                });
                refusal_message(&call.name, &reason)
            }
            ApprovalDecision::Allow => {
                event_handler.on_event(&LoopEvent::ToolExecuting {
                    name: &call.name,
                    arguments: &call.arguments,
                });
                let ctx = ToolContext::new(&state.context_id, &call.call_id);
                match tools.execute(&ctx, &call.name, &call.arguments).await {
                    Ok(output) => {
                        if call.name == TODO_TOOL_NAME {
                            sync_todo_list(state, &call.arguments);
                        }
                        output
                    }
                    Err(e) => {
                        info!("Tool {} failed: {e}", call.name);
                        render_tool_error(&e)
                    }
                }
            }
        };

        event_handler.on_event(&LoopEvent::ToolResult {
            name: &call.name,
            call_id: &call.call_id,
            result: &result,
        });
        state
            .messages
            .push(Message::tool_result(call.call_id.clone(), result));
    }

    state.loop_count += 1;
}

/// Mirror a successful `todo_write` call into the conversation state.
fn sync_todo_list(state: &mut ConversationState, arguments: &str) {
    if let Ok(args) = serde_json::from_str::<TodoWriteArgs>(arguments) {
        debug!("Todo list updated: {} item(s)", args.todos.len());
        state.todo_list = args.todos;
    }
}

// ── Checkpointing ─────────────────────────────────────────────────

/// Record `state` as entering `next_phase`. A store failure is terminal
/// for the run; earlier checkpoints stay as they were.
pub(crate) fn save_checkpoint(
    store: &dyn CheckpointStore,
    event_handler: &dyn EventHandler,
    state: &ConversationState,
    next_phase: LoopPhase,
    sequence: &mut u64,
) -> Result<(), LoopError> {
    let checkpoint = Checkpoint::new(*sequence + 1, next_phase, state.clone());
    store
        .save(&state.context_id, &checkpoint)
        .map_err(LoopError::checkpoint)?;
    *sequence += 1;
    event_handler.on_event(&LoopEvent::CheckpointSaved {
        context_id: &state.context_id,
        next_phase,
    });
    Ok(())
}
