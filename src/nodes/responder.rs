//! Reply generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::nodes::strip_fences;
use crate::outputs::{NextAction, ResponseOutcome, Sentiment};
use crate::providers::ReasoningClient;
use crate::state::ConversationState;
use crate::types::Stage;

/// System instruction for the responder model call.
pub const RESPONDER_INSTRUCTION: &str = "You write the next reply in a sales conversation. \
Be concrete, warm, and brief; use the provided knowledge snippets and listings when they help. \
If the conversation is being handed to a human, say so plainly and do not promise specifics. \
Respond with JSON only: {\"reply\": string, \"needs_more_retrieval\": boolean, true only when \
different listings would clearly improve the reply}";

const FRUSTRATED_MARKERS: &[&str] = &[
    "frustrated", "annoyed", "angry", "ridiculous", "wasting my time", "still waiting",
    "unacceptable", "terrible", "fed up", "!!",
];

const POSITIVE_MARKERS: &[&str] = &[
    "thanks", "thank you", "great", "perfect", "awesome", "love", "excited", "wonderful",
    "appreciate",
];

/// Lexical sentiment of a message. Frustration markers win over positive ones
/// so a message carrying both is treated as the riskier case.
#[must_use]
pub fn sentiment_of(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    if FRUSTRATED_MARKERS.iter().any(|m| lowered.contains(m)) {
        Sentiment::Frustrated
    } else if POSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

#[derive(Deserialize)]
struct RawResponse {
    reply: String,
    #[serde(default)]
    needs_more_retrieval: bool,
}

/// Generates the outbound reply. The next action set here is provisional;
/// scoring finalizes it once the tier is known.
pub struct ResponderNode {
    client: Arc<dyn ReasoningClient>,
    config: Arc<EngineConfig>,
}

impl ResponderNode {
    #[must_use]
    pub fn new(client: Arc<dyn ReasoningClient>, config: Arc<EngineConfig>) -> Self {
        Self { client, config }
    }

    fn render_input(&self, state: &ConversationState) -> String {
        let mut sections = vec![state.transcript(self.config.history_window).join("\n")];
        if let Some(knowledge) = &state.knowledge {
            if !knowledge.snippets.is_empty() {
                sections.push(format!("Knowledge:\n{}", knowledge.snippets.join("\n")));
            }
        }
        if let Some(retrieval) = &state.retrieval {
            let listings: Vec<String> = retrieval
                .records
                .iter()
                .map(|r| {
                    let price = r
                        .record
                        .price
                        .map_or_else(|| "price on request".to_string(), |p| format!("${p:.0}"));
                    format!("- {} ({}, {price}): {}", r.record.title, r.record.category, r.record.summary)
                })
                .collect();
            if !listings.is_empty() {
                sections.push(format!("Listings:\n{}", listings.join("\n")));
            }
        }
        if state.escalate {
            sections.push(
                "Note: this conversation is being handed to a human teammate; acknowledge that."
                    .to_string(),
            );
        }
        sections.join("\n\n")
    }
}

#[async_trait]
impl StageNode for ResponderNode {
    fn stage(&self) -> Stage {
        Stage::Respond
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let input = self.render_input(state);
        let completion = self.client.complete(RESPONDER_INSTRUCTION, &input).await?;
        let raw: RawResponse = serde_json::from_str(strip_fences(&completion.text))
            .map_err(|e| StageError::Validation(format!("responder output: {e}")))?;
        if raw.reply.trim().is_empty() {
            return Err(StageError::Validation("responder produced an empty reply".into()));
        }

        // Escalated turns never loop back into retrieval.
        let needs_more_retrieval = raw.needs_more_retrieval && !state.escalate;
        let outcome = ResponseOutcome {
            reply: raw.reply,
            sentiment: sentiment_of(&state.text),
            next_action: if state.escalate {
                NextAction::Escalate
            } else {
                NextAction::FollowUp
            },
            needs_more_retrieval,
        };
        ctx.emit(format!(
            "reply generated ({} chars, needs_more_retrieval={needs_more_retrieval})",
            outcome.reply.len()
        ));
        Ok(StageUpdate::output(StageOutput::Response(outcome)).with_usage(completion.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustration_wins_over_positive_markers() {
        assert_eq!(sentiment_of("thanks for nothing, this is ridiculous"), Sentiment::Frustrated);
        assert_eq!(sentiment_of("thanks, that looks great"), Sentiment::Positive);
        assert_eq!(sentiment_of("what are the fees"), Sentiment::Neutral);
    }
}
