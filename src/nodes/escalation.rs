//! Escalation hand-off.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::outputs::{EscalationReason, EscalationReport};
use crate::providers::{EscalationChannel, EscalationPayload};
use crate::state::ConversationState;
use crate::types::Stage;

/// How much recent transcript an escalation payload carries.
const TRANSCRIPT_WINDOW: usize = 6;

/// Fans the escalation out to every configured channel, sequentially.
///
/// A channel declining or erroring is recorded in the report but never fails
/// the turn: the user has already been told a human will follow up, and a
/// partially delivered escalation is still better than a failed one.
pub struct EscalationNotifierNode {
    channels: Vec<Arc<dyn EscalationChannel>>,
}

impl EscalationNotifierNode {
    #[must_use]
    pub fn new(channels: Vec<Arc<dyn EscalationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl StageNode for EscalationNotifierNode {
    fn stage(&self) -> Stage {
        Stage::Notify
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let payload = EscalationPayload {
            escalation_id: Uuid::new_v4().to_string(),
            thread_id: state.thread_id.clone(),
            contact_id: state.contact_id.clone(),
            reason: state
                .escalation_reason
                .clone()
                .unwrap_or(EscalationReason::ExplicitFlag),
            transcript: state.transcript(TRANSCRIPT_WINDOW),
            tier: state.score.as_ref().map(|s| s.tier),
        };

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for channel in &self.channels {
            match channel.notify(&payload).await {
                Ok(true) => delivered.push(channel.name().to_string()),
                Ok(false) => failed.push(channel.name().to_string()),
                Err(err) => {
                    warn!(channel = channel.name(), error = %err, "escalation delivery failed");
                    failed.push(channel.name().to_string());
                }
            }
        }
        ctx.emit(format!(
            "escalation {} delivered to {}/{} channels",
            payload.escalation_id,
            delivered.len(),
            self.channels.len()
        ));
        Ok(StageUpdate::output(StageOutput::Escalation(EscalationReport {
            escalation_id: payload.escalation_id,
            delivered,
            failed,
        })))
    }
}
