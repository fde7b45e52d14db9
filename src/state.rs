//! Conversation state: the single value threaded through a turn.
//!
//! Every stage reads the state immutably and returns a
//! [`StageUpdate`](crate::node::StageUpdate); only [`ConversationState::apply`]
//! mutates it. That keeps each stage pure with respect to state and makes
//! checkpoints a plain serialization of this struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChannelTag, Role, Turn};
use crate::node::{StageOutput, StageUpdate};
use crate::outputs::{
    Classification, EscalationReason, EscalationReport, Extraction, KnowledgeOutcome, LeadScore,
    ResponseOutcome, RetrievalOutcome, Terminal, recommended_action,
};
use crate::providers::TokenUsage;

/// Bump when the serialized shape changes incompatibly. Checkpoints carry
/// this so stale rows can be rejected instead of misread.
pub const SCHEMA_VERSION: u32 = 1;

/// Full state of one conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub schema_version: u32,

    // Identity of the turn.
    pub message_id: String,
    pub thread_id: String,
    pub contact_id: String,
    pub channel: ChannelTag,

    /// The inbound message under processing.
    pub text: String,
    /// Prior turns, oldest first. Does not include `text`.
    pub history: Vec<Turn>,

    // Stage outputs, filled as the pipeline advances.
    pub classification: Option<Classification>,
    pub knowledge: Option<KnowledgeOutcome>,
    pub extraction: Option<Extraction>,
    pub retrieval: Option<RetrievalOutcome>,
    pub response: Option<ResponseOutcome>,
    pub score: Option<LeadScore>,

    // Escalation bookkeeping.
    pub escalate: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub escalation_report: Option<EscalationReport>,

    // Failure and retry accounting.
    pub error: Option<String>,
    pub retry_count: u32,
    /// Completed retrieval passes this turn. Incremented only by
    /// [`ConversationState::apply`] when a retrieval output lands.
    pub retrieval_iterations: u32,

    pub terminal: Option<Terminal>,

    // Cost accounting across all model calls this turn.
    pub usage: TokenUsage,
    pub cost_usd: f64,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    #[must_use]
    pub fn builder() -> ConversationStateBuilder {
        ConversationStateBuilder::default()
    }

    /// Folds a stage result into the state. This is the only place stage
    /// outputs, usage, and cost land, so the invariants live here:
    /// `retrieval_iterations` moves monotonically, and scoring finalizes the
    /// response's next action.
    pub fn apply(&mut self, update: StageUpdate, cost: f64) {
        self.usage.merge(&update.usage);
        self.cost_usd = ((self.cost_usd + cost) * 1e6).round() / 1e6;

        let Some(output) = update.output else {
            return;
        };
        match output {
            StageOutput::Classification(c) => self.classification = Some(c),
            StageOutput::Knowledge(k) => self.knowledge = Some(k),
            StageOutput::Extraction(e) => self.extraction = Some(e),
            StageOutput::Retrieval(r) => {
                self.retrieval_iterations += 1;
                self.retrieval = Some(r);
            }
            StageOutput::Response(r) => self.response = Some(r),
            StageOutput::Scoring(s) => {
                if let Some(response) = self.response.as_mut() {
                    response.next_action = recommended_action(self.escalate, &s.flags, s.tier);
                }
                self.score = Some(s);
            }
            StageOutput::Escalation(report) => self.escalation_report = Some(report),
        }
    }

    /// Flags the turn for escalation. The first reason wins; later calls keep
    /// it so reports name the original cause.
    pub fn mark_escalated(&mut self, reason: EscalationReason) {
        self.escalate = true;
        if self.escalation_reason.is_none() {
            self.escalation_reason = Some(reason);
        }
    }

    /// Closes the turn.
    pub fn finish(&mut self, terminal: Terminal) {
        self.terminal = Some(terminal);
        self.finished_at = Some(Utc::now());
    }

    /// Renders the last `window` history turns plus the current message as
    /// `role: text` lines, oldest first. This is what model prompts see.
    #[must_use]
    pub fn transcript(&self, window: usize) -> Vec<String> {
        let start = self.history.len().saturating_sub(window);
        let mut lines: Vec<String> = self.history[start..]
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.text))
            .collect();
        lines.push(format!("{}: {}", Role::User, self.text));
        lines
    }

    /// Texts of the most recent `n` user turns from history, newest first.
    /// The current message is not included.
    #[must_use]
    pub fn recent_user_turns(&self, n: usize) -> Vec<&str> {
        self.history
            .iter()
            .rev()
            .filter(|turn| turn.has_role(Role::User))
            .take(n)
            .map(|turn| turn.text.as_str())
            .collect()
    }
}

/// Builder for the initial state of a turn.
#[derive(Debug, Default)]
pub struct ConversationStateBuilder {
    message_id: String,
    thread_id: String,
    contact_id: String,
    channel: Option<ChannelTag>,
    text: String,
    history: Vec<Turn>,
}

impl ConversationStateBuilder {
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    #[must_use]
    pub fn thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = id.into();
        self
    }

    #[must_use]
    pub fn contact_id(mut self, id: impl Into<String>) -> Self {
        self.contact_id = id.into();
        self
    }

    #[must_use]
    pub fn channel(mut self, channel: ChannelTag) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn build(self) -> ConversationState {
        ConversationState {
            schema_version: SCHEMA_VERSION,
            message_id: self.message_id,
            thread_id: self.thread_id,
            contact_id: self.contact_id,
            channel: self.channel.unwrap_or(ChannelTag::Web),
            text: self.text,
            history: self.history,
            classification: None,
            knowledge: None,
            extraction: None,
            retrieval: None,
            response: None,
            score: None,
            escalate: false,
            escalation_reason: None,
            escalation_report: None,
            error: None,
            retry_count: 0,
            retrieval_iterations: 0,
            terminal: None,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}
