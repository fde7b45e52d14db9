//! Conditional routing between stages.
//!
//! Routers are pure functions of state and config: no IO, no clocks, no
//! randomness. Given the same inputs, a turn always takes the same path,
//! which is what makes checkpoint resumption deterministic.
//!
//! The fixed edges (extract to retrieve, retrieve to respond, score and
//! notify to their terminals) live in the engine loop; only the genuinely
//! conditional hops go through this module.

use tracing::warn;

use crate::config::EngineConfig;
use crate::outputs::{Classification, EscalationReason, KnowledgeOutcome, Priority};
use crate::state::ConversationState;
use crate::types::Stage;

/// Where the pipeline goes next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    To(Stage),
    /// Flag the turn for human hand-off. The engine installs an
    /// acknowledgment reply and jumps straight to notification: no business
    /// stage runs once a turn is escalated.
    Escalate(EscalationReason),
    Finish,
}

/// After classification.
///
/// Decision order: an explicit request for a human escalates before anything
/// else, then low confidence, then escalation intents. High and urgent
/// messages answer immediately without the knowledge detour, substantive
/// messages go through knowledge and extraction, everything else gets a
/// direct reply.
#[must_use]
pub fn route_after_classifier(classification: &Classification, config: &EngineConfig) -> Route {
    if classification.escalate {
        return Route::Escalate(EscalationReason::ExplicitFlag);
    }
    if classification.confidence < config.confidence_threshold {
        return Route::Escalate(EscalationReason::LowConfidence);
    }
    if config.escalation_intents.contains(&classification.intent) {
        return Route::Escalate(EscalationReason::EscalationIntent);
    }
    if classification.priority >= Priority::High {
        return Route::To(Stage::Respond);
    }
    if classification.needs_extraction {
        return Route::To(Stage::Knowledge);
    }
    Route::To(Stage::Respond)
}

/// After the knowledge stage: a fired trigger escalates, otherwise the turn
/// proceeds to extraction.
#[must_use]
pub fn route_after_knowledge(outcome: &KnowledgeOutcome) -> Route {
    match outcome.trigger {
        Some(trigger) => Route::Escalate(EscalationReason::Trigger(trigger)),
        None => Route::To(Stage::Extract),
    }
}

/// After the responder.
///
/// Escalated turns always proceed to notification. Otherwise the responder
/// may request another retrieval pass; the iteration cap forces scoring once
/// exhausted, so the retrieve/respond loop is bounded even if the responder
/// keeps asking.
#[must_use]
pub fn route_after_response(state: &ConversationState, config: &EngineConfig) -> Route {
    if state.escalate {
        return Route::To(Stage::Notify);
    }
    let wants_more = state
        .response
        .as_ref()
        .is_some_and(|r| r.needs_more_retrieval);
    if wants_more && state.extraction.is_some() {
        if state.retrieval_iterations < config.max_retrieval_iterations {
            return Route::To(Stage::Retrieve);
        }
        warn!(
            thread_id = %state.thread_id,
            iterations = state.retrieval_iterations,
            "retrieval iteration cap reached, forcing scoring"
        );
    }
    Route::To(Stage::Score)
}
