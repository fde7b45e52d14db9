mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedReasoning, classification_json, response_json};
use leadflow::engine::Engine;
use leadflow::message::ChannelTag;
use leadflow::types::Stage;
use leadflow::worker::{InboundMessage, WorkerPool};

fn message(message_id: &str, thread_id: &str) -> InboundMessage {
    InboundMessage {
        message_id: message_id.to_string(),
        thread_id: thread_id.to_string(),
        contact_id: "contact-1".to_string(),
        channel: ChannelTag::Sms,
        text: "hi there".to_string(),
        history: vec![],
    }
}

#[tokio::test]
async fn pool_drains_the_queue_and_drops_duplicates() {
    let client = ScriptedReasoning::new()
        .on_classify(&classification_json("greeting", 0.95, false))
        .on_respond(&response_json("Hello!", false));
    let engine = Arc::new(
        Engine::builder()
            .with_reasoning_client(Arc::new(client))
            .build()
            .unwrap(),
    );

    let (tx, rx) = flume::unbounded();
    let pool = WorkerPool::spawn(Arc::clone(&engine), rx, 2);

    tx.send(message("m-1", "t-1")).unwrap();
    tx.send(message("m-2", "t-2")).unwrap();
    // Redelivery of m-1; exactly one of the two deliveries runs the pipeline.
    tx.send(message("m-1", "t-1")).unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(10), pool.join())
        .await
        .expect("pool drained");

    let stats = engine.metrics().for_stage(Stage::Classify).unwrap();
    assert_eq!(stats.calls, 2);
}

#[tokio::test]
async fn inbound_message_builds_the_initial_state() {
    let state = message("m-9", "t-9").into_state();
    assert_eq!(state.message_id, "m-9");
    assert_eq!(state.thread_id, "t-9");
    assert_eq!(state.channel, ChannelTag::Sms);
    assert!(state.terminal.is_none());
    assert_eq!(state.retrieval_iterations, 0);
}
