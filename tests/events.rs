mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedReasoning, classification_json, inbound, response_json};
use leadflow::engine::Engine;
use leadflow::events::{Event, MemorySink};
use leadflow::types::Stage;

#[tokio::test]
async fn stage_and_turn_events_reach_registered_sinks() {
    let sink = MemorySink::new();
    let client = ScriptedReasoning::new()
        .on_classify(&classification_json("greeting", 0.95, false))
        .on_respond(&response_json("Hello!", false));
    let engine = Engine::builder()
        .with_reasoning_client(Arc::new(client))
        .with_sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    engine.run(inbound("m-1", "t-1", "hi")).await.unwrap();

    // The listener fans out asynchronously; give it a moment to drain.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = sink.snapshot();
    assert!(!events.is_empty());

    let stages: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            Event::Stage(s) => Some(s.stage),
            Event::Turn(_) => None,
        })
        .collect();
    assert!(stages.contains(&Stage::Classify));
    assert!(stages.contains(&Stage::Respond));
    assert!(stages.contains(&Stage::Score));

    let turn_notes: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::Turn(t) => Some(t.note.as_str()),
            Event::Stage(_) => None,
        })
        .collect();
    assert!(turn_notes.iter().any(|n| n.contains("finished")));
}

#[tokio::test]
async fn duplicate_suppression_is_observable() {
    let sink = MemorySink::new();
    let client = ScriptedReasoning::new()
        .on_classify(&classification_json("greeting", 0.95, false))
        .on_respond(&response_json("Hello!", false));
    let engine = Engine::builder()
        .with_reasoning_client(Arc::new(client))
        .with_sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    engine.run(inbound("m-2", "t-2", "hi")).await.unwrap();
    let _ = engine.run(inbound("m-2", "t-2", "hi")).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let notes: Vec<String> = sink
        .snapshot()
        .iter()
        .filter_map(|e| match e {
            Event::Turn(t) => Some(t.note.clone()),
            Event::Stage(_) => None,
        })
        .collect();
    assert!(notes.iter().any(|n| n == "duplicate suppressed"));
}
