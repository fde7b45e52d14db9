//! Intent classification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::nodes::strip_fences;
use crate::outputs::{Classification, Intent, Priority};
use crate::providers::ReasoningClient;
use crate::state::ConversationState;
use crate::types::Stage;

/// System instruction for the classifier model call.
pub const CLASSIFIER_INSTRUCTION: &str = "You classify inbound sales conversation messages. \
Respond with JSON only, no prose: \
{\"intent\": one of [greeting, inquiry, pricing, scheduling, complaint, support, legal, off_topic], \
\"priority\": one of [low, normal, high, urgent], \
\"confidence\": number between 0 and 1, \
\"needs_extraction\": boolean, true when the message carries requirements worth extracting, \
\"escalate\": boolean, true only when the user explicitly asks for a human}";

#[derive(Deserialize)]
struct RawClassification {
    intent: Intent,
    priority: Priority,
    confidence: f64,
    needs_extraction: bool,
    #[serde(default)]
    escalate: bool,
}

/// Classifies the inbound message into an intent, priority, and extraction
/// hint. The first stage of every turn.
pub struct ClassifierNode {
    client: Arc<dyn ReasoningClient>,
    config: Arc<EngineConfig>,
}

impl ClassifierNode {
    #[must_use]
    pub fn new(client: Arc<dyn ReasoningClient>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl StageNode for ClassifierNode {
    fn stage(&self) -> Stage {
        Stage::Classify
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let input = state.transcript(self.config.history_window).join("\n");
        let completion = self.client.complete(CLASSIFIER_INSTRUCTION, &input).await?;
        let raw: RawClassification = serde_json::from_str(strip_fences(&completion.text))
            .map_err(|e| StageError::Validation(format!("classifier output: {e}")))?;
        let classification = Classification {
            intent: raw.intent,
            priority: raw.priority,
            confidence: raw.confidence.clamp(0.0, 1.0),
            needs_extraction: raw.needs_extraction,
            escalate: raw.escalate,
        };
        ctx.emit(format!(
            "classified as {} ({:?}, confidence {:.2})",
            classification.intent.as_str(),
            classification.priority,
            classification.confidence
        ));
        Ok(StageUpdate::output(StageOutput::Classification(classification))
            .with_usage(completion.usage))
    }
}
