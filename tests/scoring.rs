mod common;

use common::inbound;
use leadflow::config::TierBounds;
use leadflow::message::Turn;
use leadflow::node::{StageOutput, StageUpdate};
use leadflow::nodes::score_lead;
use leadflow::outputs::{
    BehaviorFlags, ExtractedProfile, Extraction, KnowledgeDomain, KnowledgeOutcome, NextAction,
    QualityTier, RankedRecord, ResponseOutcome, RetrievalOutcome, ScoreComponents, Sentiment,
    recommended_action,
};
use leadflow::state::ConversationState;

fn rich_state() -> ConversationState {
    let mut state = inbound(
        "m-1",
        "t-1",
        "Thanks, I loved the downtown condo with the balcony! Can we schedule a tour this weekend?",
    );
    state.history = vec![
        Turn::user("hi, looking for a condo"),
        Turn::assistant("happy to help"),
        Turn::user("downtown preferred, under 400k"),
        Turn::assistant("here are some options"),
        Turn::user("the balcony one looks nice"),
    ];
    state.knowledge = Some(KnowledgeOutcome {
        domain: KnowledgeDomain::Product,
        snippets: vec![],
        trigger: None,
    });
    state.extraction = Some(Extraction {
        profile: ExtractedProfile {
            budget_max: Some(400_000.0),
            category: Some("condo".into()),
            location: Some("downtown".into()),
            timeframe: Some("this weekend".into()),
            features: Some(vec!["balcony".into()]),
            ..Default::default()
        },
        confidence: 0.625,
    });
    state.retrieval = Some(RetrievalOutcome {
        query: "condo downtown balcony".into(),
        records: vec![RankedRecord {
            record: common::sample_catalog().remove(0),
            score: 0.9,
        }],
        from_cache: false,
    });
    state.response = Some(ResponseOutcome {
        reply: "Let's set that up".into(),
        sentiment: Sentiment::Positive,
        next_action: NextAction::FollowUp,
        needs_more_retrieval: false,
    });
    state
}

#[test]
fn engaged_lead_with_budget_and_timeline_scores_hot() {
    let state = rich_state();
    let score = score_lead(&state, &TierBounds::default());
    assert_eq!(score.total, score.components.total());
    assert!(score.total >= 80, "expected hot total, got {}", score.total);
    assert_eq!(score.tier, QualityTier::Hot);
    assert!(score.flags.scheduling_requested);
    assert!(score.flags.budget_disclosed);
    assert!(score.flags.repeated_contact);
    assert!(score.tags.contains("tier-hot"));
    assert!(score.tags.contains("scheduling-requested"));
}

#[test]
fn scoring_finalizes_next_action_through_state_apply() {
    let mut state = rich_state();
    let score = score_lead(&state, &TierBounds::default());
    state.apply(StageUpdate::output(StageOutput::Scoring(score)), 0.0);
    assert_eq!(
        state.response.as_ref().map(|r| r.next_action),
        Some(NextAction::Schedule)
    );
}

#[test]
fn component_totals_drive_tier_and_action() {
    let components = ScoreComponents {
        fit: 35,
        engagement: 32,
        readiness: 18,
    };
    assert_eq!(components.total(), 85);
    let tier = TierBounds::default().tier_for(components.total());
    assert_eq!(tier, QualityTier::Hot);
    let flags = BehaviorFlags {
        scheduling_requested: true,
        budget_disclosed: true,
        repeated_contact: false,
    };
    assert_eq!(recommended_action(false, &flags, tier), NextAction::Schedule);
}

#[test]
fn bare_greeting_scores_cold() {
    let state = inbound("m-2", "t-2", "hi");
    let score = score_lead(&state, &TierBounds::default());
    assert_eq!(score.tier, QualityTier::Cold);
    assert!(!score.flags.budget_disclosed);
    assert!(score.tags.contains("tier-cold"));
}

#[test]
fn frustration_costs_engagement() {
    let mut positive = rich_state();
    let positive_score = score_lead(&positive, &TierBounds::default());
    if let Some(response) = positive.response.as_mut() {
        response.sentiment = Sentiment::Frustrated;
    }
    let frustrated_score = score_lead(&positive, &TierBounds::default());
    assert!(frustrated_score.components.engagement < positive_score.components.engagement);
    assert_eq!(frustrated_score.components.fit, positive_score.components.fit);
    assert_eq!(
        frustrated_score.components.readiness,
        positive_score.components.readiness
    );
}

#[test]
fn components_stay_inside_their_bands() {
    let score = score_lead(&rich_state(), &TierBounds::default());
    assert!(score.components.fit <= 40);
    assert!(score.components.engagement <= 35);
    assert!(score.components.readiness <= 25);
    assert!(score.total <= 100);
}
