//! Escalation-trigger scan and knowledge lookup.
//!
//! This stage is fully deterministic: trigger detection is keyword matching
//! in a fixed priority order, and the repeated-confusion check is a token
//! overlap against recent user turns. No model call, so it is free and
//! testable without fakes.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::outputs::{EscalationTrigger, KnowledgeDomain, KnowledgeOutcome};
use crate::state::ConversationState;
use crate::types::Stage;

/// Keyword lists per trigger, in detection priority order. The first trigger
/// with a matching phrase wins, regardless of where phrases appear in the
/// message.
const TRIGGER_PHRASES: &[(EscalationTrigger, &[&str])] = &[
    (
        EscalationTrigger::LegalCompliance,
        &["lawsuit", "lawyer", "attorney", "legal action", "sue you", "regulation", "compliance"],
    ),
    (
        EscalationTrigger::ExplicitComplaint,
        &["complaint", "unacceptable", "terrible service", "refund", "worst experience", "scam"],
    ),
    (
        EscalationTrigger::DomainExpertRequired,
        &["zoning", "structural", "easement", "appraisal dispute", "boundary survey"],
    ),
    (
        EscalationTrigger::ComplexFinancial,
        &["1031 exchange", "bridge loan", "seller financing", "balloon payment", "lien"],
    ),
];

const DOMAIN_KEYWORDS: &[(KnowledgeDomain, &[&str])] = &[
    (
        KnowledgeDomain::Financing,
        &["mortgage", "loan", "finance", "financing", "down payment", "interest rate", "pre-approval"],
    ),
    (
        KnowledgeDomain::Pricing,
        &["price", "pricing", "cost", "how much", "fee", "fees", "commission"],
    ),
    (
        KnowledgeDomain::Process,
        &["process", "paperwork", "closing", "inspection", "offer", "how do i", "steps"],
    ),
    (
        KnowledgeDomain::Product,
        &["bedroom", "condo", "house", "apartment", "listing", "property", "unit", "garage", "yard"],
    ),
];

fn token_set(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of the current message's tokens that also appear in `previous`.
fn overlap_ratio(current: &BTreeSet<String>, previous: &str) -> f64 {
    if current.is_empty() {
        return 0.0;
    }
    let previous = token_set(previous);
    let shared = current.intersection(&previous).count();
    shared as f64 / current.len() as f64
}

/// Scans for escalation triggers and matches the message to a knowledge
/// domain with supporting snippets.
pub struct KnowledgeNode {
    config: Arc<EngineConfig>,
}

impl KnowledgeNode {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    fn detect_trigger(&self, state: &ConversationState) -> Option<EscalationTrigger> {
        let lowered = state.text.to_lowercase();
        for (trigger, phrases) in TRIGGER_PHRASES {
            if phrases.iter().any(|phrase| lowered.contains(phrase)) {
                return Some(*trigger);
            }
        }
        // Repeated confusion ranks last: keyword triggers describe the
        // message itself and take precedence over conversational drift.
        let current = token_set(&state.text);
        let repeated = state
            .recent_user_turns(self.config.confusion_window)
            .iter()
            .any(|previous| overlap_ratio(&current, previous) >= self.config.confusion_overlap);
        repeated.then_some(EscalationTrigger::RepeatedConfusion)
    }

    fn detect_domain(text: &str) -> KnowledgeDomain {
        let lowered = text.to_lowercase();
        for (domain, keywords) in DOMAIN_KEYWORDS {
            if keywords.iter().any(|keyword| lowered.contains(keyword)) {
                return *domain;
            }
        }
        KnowledgeDomain::General
    }
}

#[async_trait]
impl StageNode for KnowledgeNode {
    fn stage(&self) -> Stage {
        Stage::Knowledge
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let trigger = self.detect_trigger(state);
        let domain = Self::detect_domain(&state.text);
        if let Some(trigger) = trigger {
            ctx.emit(format!("escalation trigger fired: {}", trigger.as_str()));
        }
        let outcome = KnowledgeOutcome {
            domain,
            snippets: if trigger.is_none() {
                self.config.snippets_for(domain)
            } else {
                vec![]
            },
            trigger,
        };
        Ok(StageUpdate::output(StageOutput::Knowledge(outcome)))
    }
}
