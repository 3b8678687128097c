//! The `Finalize` collaborator: turns an accumulated history into the single
//! user-visible answer.

use super::events::Termination;
use super::state::ConversationState;
use crate::api::ModelClient;
use crate::error::ModelError;
use crate::message::Message;
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// Returned when the loop stopped early and nothing usable was produced.
pub const NO_ANSWER_NOTICE: &str =
    "The task stopped before an answer was produced. No final response is available.";

/// Everything a finalizer may look at.
pub struct FinalizeRequest<'a> {
    pub state: &'a ConversationState,
    pub termination: Termination,
    pub model: &'a dyn ModelClient,
    /// Prompt for a best-effort answer after a forced stop.
    pub prompt: &'a str,
}

/// Produces the final answer for a run.
pub trait Finalizer: Send + Sync {
    fn finalize<'a>(&'a self, request: FinalizeRequest<'a>) -> BoxFuture<'a, Result<String, ModelError>>;
}

/// Default finalizer.
///
/// A completed run answers with the model's last text. A run stopped by the
/// loop limit gets one more model call, with no tools offered, asking for a
/// best-effort answer. If that call fails the last AI text (or
/// [`NO_ANSWER_NOTICE`]) is used instead, so a forced stop always produces
/// an answer.
pub struct ModelFinalizer;

impl ModelFinalizer {
    fn fallback(state: &ConversationState) -> String {
        state
            .last_ai_text()
            .map_or_else(|| NO_ANSWER_NOTICE.to_string(), str::to_string)
    }
}

impl Finalizer for ModelFinalizer {
    fn finalize<'a>(&'a self, request: FinalizeRequest<'a>) -> BoxFuture<'a, Result<String, ModelError>> {
        Box::pin(async move {
            let state = request.state;
            if request.termination == Termination::Completed {
                return Ok(Self::fallback(state));
            }

            // Unanswered calls would make the transcript invalid for the API.
            let mut messages = crate::context::curator::clean(&state.messages);
            messages.push(Message::synthetic_human(request.prompt));
            debug!(
                "Requesting best-effort answer for {} after loop limit",
                state.context_id
            );
            match request.model.invoke(&messages, &[]).await {
                Ok(response) => Ok(response
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| Self::fallback(state))),
                Err(e) => {
                    warn!("Finalize call failed for {}: {e}", state.context_id);
                    Ok(Self::fallback(state))
                }
            }
        })
    }
}
