//! The stage abstraction.
//!
//! A [`StageNode`] is one unit of pipeline work: it reads the current
//! [`ConversationState`] and returns a [`StageUpdate`] describing what it
//! produced and what it spent. Nodes never mutate state directly, which is
//! what lets the executor retry them and the engine checkpoint between them.

use async_trait::async_trait;

use crate::error::StageError;
use crate::events::EventEmitter;
use crate::outputs::{
    Classification, EscalationReport, Extraction, KnowledgeOutcome, LeadScore, ResponseOutcome,
    RetrievalOutcome,
};
use crate::providers::TokenUsage;
use crate::state::ConversationState;
use crate::types::Stage;

/// Per-run context handed to a node.
#[derive(Clone)]
pub struct StageContext {
    pub stage: Stage,
    /// 1-based attempt number; greater than 1 on retries.
    pub attempt: u32,
    emitter: EventEmitter,
}

impl StageContext {
    #[must_use]
    pub fn new(stage: Stage, attempt: u32, emitter: EventEmitter) -> Self {
        Self {
            stage,
            attempt,
            emitter,
        }
    }

    /// Emits a diagnostic message attributed to this stage. Emission failure
    /// is swallowed: observability must never fail a turn.
    pub fn emit(&self, message: impl Into<String>) {
        self.emitter.emit_stage(self.stage, self.attempt, message.into());
    }
}

/// What one stage run produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageUpdate {
    pub output: Option<StageOutput>,
    pub usage: TokenUsage,
}

impl StageUpdate {
    #[must_use]
    pub fn output(output: StageOutput) -> Self {
        Self {
            output: Some(output),
            usage: TokenUsage::default(),
        }
    }

    /// An update that only reports spend, producing no output. Used by runs
    /// whose result is already decided (e.g. an escalation short-circuit).
    #[must_use]
    pub fn usage_only(usage: TokenUsage) -> Self {
        Self {
            output: None,
            usage,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// The closed set of stage payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutput {
    Classification(Classification),
    Knowledge(KnowledgeOutcome),
    Extraction(Extraction),
    Retrieval(RetrievalOutcome),
    Response(ResponseOutcome),
    Scoring(LeadScore),
    Escalation(EscalationReport),
}

/// One pipeline stage.
///
/// Implementations must be idempotent with respect to external effects under
/// retry, or tolerate at-least-once execution: the executor reruns a node on
/// transient failure.
#[async_trait]
pub trait StageNode: Send + Sync {
    /// Which stage this node implements.
    fn stage(&self) -> Stage;

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError>;
}
