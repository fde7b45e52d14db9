mod common;

use std::sync::Arc;

use common::{RecordingChannel, ScriptedReasoning, inbound};
use leadflow::config::EngineConfig;
use leadflow::error::StageError;
use leadflow::events::EventEmitter;
use leadflow::message::Turn;
use leadflow::node::{StageContext, StageNode, StageOutput};
use leadflow::nodes::{
    ClassifierNode, EscalationNotifierNode, ExtractorNode, KnowledgeNode, sentiment_of,
};
use leadflow::outputs::{
    EscalationReason, EscalationTrigger, ExtractedProfile, Extraction, Intent, Sentiment,
};
use leadflow::types::Stage;

fn ctx(stage: Stage) -> StageContext {
    StageContext::new(stage, 1, EventEmitter::disconnected())
}

#[tokio::test]
async fn classifier_parses_fenced_output_and_clamps_confidence() {
    let client = Arc::new(
        ScriptedReasoning::new().on_classify(
            "```json\n{\"intent\":\"pricing\",\"priority\":\"high\",\"confidence\":1.7,\"needs_extraction\":true}\n```",
        ),
    );
    let node = ClassifierNode::new(client, Arc::new(EngineConfig::default()));
    let state = inbound("m-1", "t-1", "how much is the condo");
    let update = node.run(&state, ctx(Stage::Classify)).await.unwrap();
    let Some(StageOutput::Classification(c)) = update.output else {
        panic!("expected classification output");
    };
    assert_eq!(c.intent, Intent::Pricing);
    assert_eq!(c.confidence, 1.0);
    assert!(update.usage.total() > 0);
}

#[tokio::test]
async fn classifier_rejects_non_json_output() {
    let client = Arc::new(ScriptedReasoning::new().on_classify("sure, that's a pricing question"));
    let node = ClassifierNode::new(client, Arc::new(EngineConfig::default()));
    let state = inbound("m-1", "t-1", "how much");
    let err = node.run(&state, ctx(Stage::Classify)).await.unwrap_err();
    assert!(matches!(err, StageError::Validation(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn knowledge_trigger_priority_is_fixed() {
    let node = KnowledgeNode::new(Arc::new(EngineConfig::default()));
    // Complaint and financial phrasing in one message: the complaint wins
    // because it is declared earlier in the trigger order.
    let state = inbound(
        "m-1",
        "t-1",
        "this is a formal complaint about the balloon payment you quoted",
    );
    let update = node.run(&state, ctx(Stage::Knowledge)).await.unwrap();
    let Some(StageOutput::Knowledge(outcome)) = update.output else {
        panic!("expected knowledge output");
    };
    assert_eq!(outcome.trigger, Some(EscalationTrigger::ExplicitComplaint));
    assert!(outcome.snippets.is_empty());
}

#[tokio::test]
async fn knowledge_detects_repeated_confusion() {
    let node = KnowledgeNode::new(Arc::new(EngineConfig::default()));
    let mut state = inbound("m-1", "t-1", "what does the inspection contingency mean");
    state.history = vec![
        Turn::user("what does the inspection contingency mean exactly"),
        Turn::assistant("it lets you back out after a bad inspection"),
    ];
    let update = node.run(&state, ctx(Stage::Knowledge)).await.unwrap();
    let Some(StageOutput::Knowledge(outcome)) = update.output else {
        panic!("expected knowledge output");
    };
    assert_eq!(outcome.trigger, Some(EscalationTrigger::RepeatedConfusion));
}

#[tokio::test]
async fn knowledge_attaches_snippets_when_no_trigger_fires() {
    let node = KnowledgeNode::new(Arc::new(EngineConfig::default()));
    let state = inbound("m-1", "t-1", "do you help with mortgage pre-approval");
    let update = node.run(&state, ctx(Stage::Knowledge)).await.unwrap();
    let Some(StageOutput::Knowledge(outcome)) = update.output else {
        panic!("expected knowledge output");
    };
    assert!(outcome.trigger.is_none());
    assert!(!outcome.snippets.is_empty());
}

#[tokio::test]
async fn knowledge_snippets_are_configured_not_hard_coded() {
    let mut config = EngineConfig::default();
    config.knowledge_snippets.insert(
        leadflow::outputs::KnowledgeDomain::Financing,
        vec!["Ask about our first-time buyer program.".to_string()],
    );
    let node = KnowledgeNode::new(Arc::new(config));
    let state = inbound("m-1", "t-1", "do you help with mortgage pre-approval");
    let update = node.run(&state, ctx(Stage::Knowledge)).await.unwrap();
    let Some(StageOutput::Knowledge(outcome)) = update.output else {
        panic!("expected knowledge output");
    };
    assert_eq!(
        outcome.snippets,
        vec!["Ask about our first-time buyer program.".to_string()]
    );
}

#[tokio::test]
async fn extraction_confidence_is_floored() {
    let config = Arc::new(EngineConfig::default());
    let client = Arc::new(ScriptedReasoning::new().on_extract(
        "{\"budget_min\":null,\"budget_max\":null,\"category\":null,\"location\":null,\
         \"timeframe\":null,\"quantity\":null,\"features\":null,\"contact_email\":null}",
    ));
    let node = ExtractorNode::new(client, Arc::clone(&config));
    let state = inbound("m-1", "t-1", "");
    let update = node.run(&state, ctx(Stage::Extract)).await.unwrap();
    let Some(StageOutput::Extraction(extraction)) = update.output else {
        panic!("expected extraction output");
    };
    assert_eq!(extraction.profile.filled_fields(), 0);
    assert_eq!(extraction.confidence, config.min_extraction_confidence);
}

#[tokio::test]
async fn extraction_merges_over_earlier_turns() {
    let config = Arc::new(EngineConfig::default());
    let client = Arc::new(ScriptedReasoning::new().on_extract(
        "{\"budget_min\":null,\"budget_max\":null,\"category\":null,\"location\":\"uptown\",\
         \"timeframe\":null,\"quantity\":null,\"features\":null,\"contact_email\":null}",
    ));
    let node = ExtractorNode::new(client, config);
    let mut state = inbound("m-2", "t-1", "actually uptown works too");
    state.extraction = Some(Extraction {
        profile: ExtractedProfile {
            budget_max: Some(400_000.0),
            category: Some("condo".into()),
            ..Default::default()
        },
        confidence: 0.25,
    });
    let update = node.run(&state, ctx(Stage::Extract)).await.unwrap();
    let Some(StageOutput::Extraction(extraction)) = update.output else {
        panic!("expected extraction output");
    };
    assert_eq!(extraction.profile.budget_max, Some(400_000.0));
    assert_eq!(extraction.profile.location.as_deref(), Some("uptown"));
    assert_eq!(extraction.profile.filled_fields(), 3);
}

#[test]
fn sentiment_heuristics() {
    assert_eq!(sentiment_of("I am fed up with this"), Sentiment::Frustrated);
    assert_eq!(sentiment_of("thank you, that was perfect"), Sentiment::Positive);
    assert_eq!(sentiment_of("what time works"), Sentiment::Neutral);
}

#[tokio::test]
async fn notifier_reports_per_channel_outcomes() {
    let oncall = Arc::new(RecordingChannel::new("oncall", true));
    let crm = Arc::new(RecordingChannel::new("crm", false));
    let node = EscalationNotifierNode::new(vec![oncall.clone(), crm.clone()]);
    let mut state = inbound("m-1", "t-1", "I want to speak to a human");
    state.mark_escalated(EscalationReason::ExplicitFlag);
    let update = node.run(&state, ctx(Stage::Notify)).await.unwrap();
    let Some(StageOutput::Escalation(report)) = update.output else {
        panic!("expected escalation output");
    };
    assert_eq!(report.delivered, vec!["oncall".to_string()]);
    assert_eq!(report.failed, vec!["crm".to_string()]);
    assert!(report.any_delivered());
    let payload = &oncall.seen()[0];
    assert_eq!(payload.reason, EscalationReason::ExplicitFlag);
    assert_eq!(payload.escalation_id, report.escalation_id);
    assert!(payload.transcript.last().unwrap().contains("speak to a human"));
}
