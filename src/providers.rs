//! External-service seams.
//!
//! Every side effect the pipeline depends on goes through a trait defined
//! here: language-model calls, catalog search, escalation delivery, and the
//! processed-message marker. Production wires real adapters; tests wire the
//! in-crate fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::outputs::{CandidateRecord, EscalationReason, QualityTier};

/// Token counts attributed to one model call, and accumulated per turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    /// Input tokens served from the provider's prompt cache.
    pub cached: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            cached: 0,
        }
    }

    /// Accumulates another usage record into this one.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cached += other.cached;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cached
    }
}

/// One model completion: the text and what it cost in tokens.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

impl Completion {
    #[must_use]
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// A language-model backend.
///
/// Nodes pass a stage-specific `instruction` plus the rendered conversation
/// `input`; the backend returns raw completion text. Parsing and validation
/// stay on the node side so a malformed completion is the node's error, not
/// the provider's.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, instruction: &str, input: &str) -> Result<Completion, ProviderError>;
}

/// Structured filters applied before similarity ranking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<String>,
    /// Records priced strictly above this are excluded.
    pub price_ceiling: Option<f64>,
    /// Records priced strictly below this are excluded.
    pub price_floor: Option<f64>,
}

/// A catalog search request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub top_k: usize,
}

/// A catalog search backend. Returns candidates already filtered but not yet
/// rank-scored.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, ProviderError>;
}

/// Everything a human needs to pick up an escalated conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationPayload {
    pub escalation_id: String,
    pub thread_id: String,
    pub contact_id: String,
    pub reason: EscalationReason,
    /// Recent transcript, oldest first.
    pub transcript: Vec<String>,
    pub tier: Option<QualityTier>,
}

/// One escalation delivery target (on-call chat, CRM task queue, pager).
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    /// Stable channel name used in [`EscalationReport`](crate::outputs::EscalationReport).
    fn name(&self) -> &str;

    /// Returns `Ok(true)` if the channel accepted the hand-off, `Ok(false)`
    /// if it declined (muted, filtered). Errors count as delivery failures
    /// but never fail the turn.
    async fn notify(&self, payload: &EscalationPayload) -> Result<bool, ProviderError>;
}

/// Processed-message marker used for duplicate suppression.
///
/// `try_acquire` is the atomic check-and-set: the first caller for a message
/// id wins, every later caller within the TTL sees `false`.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn try_acquire(&self, message_id: &str, ttl: Duration) -> Result<bool, ProviderError>;

    /// Removes a marker early, letting a message be retried. The engine only
    /// calls this when a turn failed before producing any visible effect.
    async fn release(&self, message_id: &str) -> Result<(), ProviderError>;
}
