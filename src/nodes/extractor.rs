//! Structured profile extraction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::nodes::strip_fences;
use crate::outputs::{ExtractedProfile, Extraction};
use crate::providers::ReasoningClient;
use crate::state::ConversationState;
use crate::types::Stage;

/// System instruction for the extractor model call.
pub const EXTRACTOR_INSTRUCTION: &str = "You extract buyer requirements from sales conversations. \
Respond with JSON only, using null for anything the conversation does not state: \
{\"budget_min\": number|null, \"budget_max\": number|null, \"category\": string|null, \
\"location\": string|null, \"timeframe\": string|null, \"quantity\": integer|null, \
\"features\": [string]|null, \"contact_email\": string|null}. \
Never invent values the user did not give.";

/// Extracts the lead profile from the conversation and merges it over what
/// earlier turns established. Confidence is the field coverage ratio, floored
/// at the configured minimum so a sparse but valid extraction still scores.
pub struct ExtractorNode {
    client: Arc<dyn ReasoningClient>,
    config: Arc<EngineConfig>,
}

impl ExtractorNode {
    #[must_use]
    pub fn new(client: Arc<dyn ReasoningClient>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl StageNode for ExtractorNode {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let input = state.transcript(self.config.history_window).join("\n");
        let completion = self.client.complete(EXTRACTOR_INSTRUCTION, &input).await?;
        let fresh: ExtractedProfile = serde_json::from_str(strip_fences(&completion.text))
            .map_err(|e| StageError::Validation(format!("extractor output: {e}")))?;

        let profile = match state.extraction.as_ref() {
            Some(previous) => previous.profile.merged_with(&fresh),
            None => fresh,
        };
        let coverage = profile.filled_fields() as f64 / ExtractedProfile::FIELD_COUNT as f64;
        let confidence = coverage.max(self.config.min_extraction_confidence);
        ctx.emit(format!(
            "extracted {}/{} profile fields",
            profile.filled_fields(),
            ExtractedProfile::FIELD_COUNT
        ));
        Ok(
            StageUpdate::output(StageOutput::Extraction(Extraction { profile, confidence }))
                .with_usage(completion.usage),
        )
    }
}
