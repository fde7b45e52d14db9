//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use leadflow::error::ProviderError;
use leadflow::message::ChannelTag;
use leadflow::outputs::CandidateRecord;
use leadflow::providers::{
    Completion, EscalationChannel, EscalationPayload, ReasoningClient, TokenUsage,
};
use leadflow::state::ConversationState;

/// Scripted reasoning backend. Each stage keys on its instruction prefix;
/// responses are consumed in order, with the last one repeating.
#[derive(Default)]
pub struct ScriptedReasoning {
    classify: Mutex<VecDeque<String>>,
    extract: Mutex<VecDeque<String>>,
    respond: Mutex<VecDeque<String>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_classify(self, json: &str) -> Self {
        self.classify.lock().unwrap().push_back(json.to_string());
        self
    }

    pub fn on_extract(self, json: &str) -> Self {
        self.extract.lock().unwrap().push_back(json.to_string());
        self
    }

    pub fn on_respond(self, json: &str) -> Self {
        self.respond.lock().unwrap().push_back(json.to_string());
        self
    }

    fn next(queue: &Mutex<VecDeque<String>>, what: &str) -> Result<String, ProviderError> {
        let mut queue = queue.lock().unwrap();
        match queue.len() {
            0 => Err(ProviderError::malformed(
                "scripted",
                format!("no scripted {what} response"),
            )),
            1 => Ok(queue.front().cloned().unwrap()),
            _ => Ok(queue.pop_front().unwrap()),
        }
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn complete(&self, instruction: &str, _input: &str) -> Result<Completion, ProviderError> {
        let text = if instruction.starts_with("You classify") {
            Self::next(&self.classify, "classify")?
        } else if instruction.starts_with("You extract") {
            Self::next(&self.extract, "extract")?
        } else if instruction.starts_with("You write") {
            Self::next(&self.respond, "respond")?
        } else {
            return Err(ProviderError::malformed("scripted", "unknown instruction"));
        };
        Ok(Completion::new(text, TokenUsage::new(100, 25)))
    }
}

/// Escalation channel that records every payload it sees.
pub struct RecordingChannel {
    name: String,
    accept: bool,
    pub payloads: Mutex<Vec<EscalationPayload>>,
}

impl RecordingChannel {
    pub fn new(name: &str, accept: bool) -> Self {
        Self {
            name: name.to_string(),
            accept,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<EscalationPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl EscalationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, payload: &EscalationPayload) -> Result<bool, ProviderError> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(self.accept)
    }
}

/// A fresh turn state with sensible defaults.
pub fn inbound(message_id: &str, thread_id: &str, text: &str) -> ConversationState {
    ConversationState::builder()
        .message_id(message_id)
        .thread_id(thread_id)
        .contact_id("contact-1")
        .channel(ChannelTag::Web)
        .text(text)
        .build()
}

/// Scripted JSON fragments.
pub fn classification_json(intent: &str, confidence: f64, needs_extraction: bool) -> String {
    format!(
        "{{\"intent\":\"{intent}\",\"priority\":\"normal\",\"confidence\":{confidence},\"needs_extraction\":{needs_extraction}}}"
    )
}

pub fn extraction_json() -> String {
    "{\"budget_min\":null,\"budget_max\":400000,\"category\":\"condo\",\"location\":\"downtown\",\
     \"timeframe\":\"3 months\",\"quantity\":null,\"features\":[\"balcony\"],\"contact_email\":null}"
        .to_string()
}

pub fn response_json(reply: &str, needs_more: bool) -> String {
    format!("{{\"reply\":\"{reply}\",\"needs_more_retrieval\":{needs_more}}}")
}

/// A small catalog for retrieval tests.
pub fn sample_catalog() -> Vec<CandidateRecord> {
    vec![
        record("c-1", "Downtown condo with balcony", "condo", Some(380_000.0), 0, &["balcony"]),
        record("c-2", "Midtown condo", "condo", Some(350_000.0), 1, &[]),
        record("c-3", "Suburban house", "house", Some(420_000.0), 0, &["yard"]),
        record("c-4", "Luxury penthouse", "condo", Some(900_000.0), 2, &["balcony", "view"]),
    ]
}

fn record(
    id: &str,
    title: &str,
    category: &str,
    price: Option<f64>,
    source_priority: u8,
    attributes: &[&str],
) -> CandidateRecord {
    CandidateRecord {
        id: id.to_string(),
        title: title.to_string(),
        category: category.to_string(),
        price,
        summary: format!("{title} in great condition"),
        source_priority,
        attributes: attributes.iter().map(|a| (*a).to_string()).collect::<BTreeSet<_>>(),
        age_days: 10,
    }
}
