//! Lead quality scoring.
//!
//! Scoring is a pure function of the turn's state: no model call, no IO.
//! Three additive components, each clamped to its band before summing, so
//! the total always lands in 0..=100 and the tier follows directly.

use async_trait::async_trait;

use crate::config::TierBounds;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::outputs::{
    BehaviorFlags, Intent, KnowledgeDomain, LeadScore, ScoreComponents, Sentiment,
};
use crate::state::ConversationState;
use crate::types::Stage;

const SCHEDULING_PHRASES: &[&str] = &[
    "schedule", "tour", "visit", "appointment", "viewing", "see it in person", "showing",
];

fn fit_component(state: &ConversationState) -> u8 {
    let mut fit = 0.0_f64;
    if let Some(extraction) = &state.extraction {
        let coverage = extraction.profile.filled_fields() as f64
            / crate::outputs::ExtractedProfile::FIELD_COUNT as f64;
        fit += coverage * 24.0;
    }
    if let Some(retrieval) = &state.retrieval {
        if !retrieval.records.is_empty() {
            fit += 8.0;
        }
        if retrieval.records.len() >= 3 {
            fit += 4.0;
        }
    }
    if state.knowledge.as_ref().is_some_and(|k| {
        matches!(k.domain, KnowledgeDomain::Product | KnowledgeDomain::Pricing)
    }) {
        fit += 4.0;
    }
    (fit.round() as u8).min(40)
}

fn engagement_component(state: &ConversationState, flags: &BehaviorFlags) -> u8 {
    let user_turns = state.recent_user_turns(usize::MAX).len() as u64;
    let mut engagement = (user_turns * 4).min(16) as u8;
    if state.text.len() > 80 {
        engagement += 5;
    }
    engagement += match state.response.as_ref().map(|r| r.sentiment) {
        Some(Sentiment::Positive) => 8,
        Some(Sentiment::Neutral) | None => 4,
        Some(Sentiment::Frustrated) => 0,
    };
    if flags.repeated_contact {
        engagement += 6;
    }
    engagement.min(35)
}

fn readiness_component(flags: &BehaviorFlags, has_timeframe: bool) -> u8 {
    let mut readiness = 0;
    if flags.budget_disclosed {
        readiness += 10;
    }
    if has_timeframe {
        readiness += 7;
    }
    if flags.scheduling_requested {
        readiness += 8;
    }
    readiness.min(25)
}

fn behavior_flags(state: &ConversationState) -> BehaviorFlags {
    let lowered = state.text.to_lowercase();
    let scheduling_requested = state
        .classification
        .as_ref()
        .is_some_and(|c| c.intent == Intent::Scheduling)
        || SCHEDULING_PHRASES.iter().any(|p| lowered.contains(p));
    let profile = state.extraction.as_ref().map(|e| &e.profile);
    BehaviorFlags {
        scheduling_requested,
        budget_disclosed: profile
            .is_some_and(|p| p.budget_min.is_some() || p.budget_max.is_some()),
        repeated_contact: state.recent_user_turns(usize::MAX).len() >= 3,
    }
}

/// Scores the lead from the current state. Pure and deterministic.
#[must_use]
pub fn score_lead(state: &ConversationState, bounds: &TierBounds) -> LeadScore {
    let flags = behavior_flags(state);
    let has_timeframe = state
        .extraction
        .as_ref()
        .is_some_and(|e| e.profile.timeframe.is_some());
    let components = ScoreComponents {
        fit: fit_component(state),
        engagement: engagement_component(state, &flags),
        readiness: readiness_component(&flags, has_timeframe),
    };
    let total = components.total();
    let tier = bounds.tier_for(total);

    let mut tags = std::collections::BTreeSet::new();
    tags.insert(format!("tier-{}", tier.as_str()));
    if flags.budget_disclosed {
        tags.insert("budget-disclosed".to_string());
    }
    if flags.scheduling_requested {
        tags.insert("scheduling-requested".to_string());
    }
    if flags.repeated_contact {
        tags.insert("repeat-contact".to_string());
    }
    if state.retrieval.as_ref().is_some_and(|r| !r.records.is_empty()) {
        tags.insert("listings-shared".to_string());
    }

    LeadScore {
        components,
        total,
        tier,
        tags,
        flags,
    }
}

/// Stage wrapper around [`score_lead`].
pub struct ScorerNode {
    bounds: TierBounds,
}

impl ScorerNode {
    #[must_use]
    pub fn new(bounds: TierBounds) -> Self {
        Self { bounds }
    }
}

#[async_trait]
impl StageNode for ScorerNode {
    fn stage(&self) -> Stage {
        Stage::Score
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let score = score_lead(state, &self.bounds);
        ctx.emit(format!(
            "scored {} ({}) fit={} engagement={} readiness={}",
            score.total,
            score.tier.as_str(),
            score.components.fit,
            score.components.engagement,
            score.components.readiness
        ));
        Ok(StageUpdate::output(StageOutput::Scoring(score)))
    }
}
