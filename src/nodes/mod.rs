//! The built-in stage nodes.

mod classifier;
mod escalation;
mod extractor;
mod knowledge;
mod responder;
mod retrieval;
mod scorer;

pub use classifier::{CLASSIFIER_INSTRUCTION, ClassifierNode};
pub use escalation::EscalationNotifierNode;
pub use extractor::{EXTRACTOR_INSTRUCTION, ExtractorNode};
pub use knowledge::KnowledgeNode;
pub use responder::{RESPONDER_INSTRUCTION, ResponderNode, sentiment_of};
pub use retrieval::RetrievalNode;
pub use scorer::{ScorerNode, score_lead};

/// Strips a Markdown code fence from a model completion, if present. Models
/// wrap JSON in fences often enough that every parsing node needs this.
#[must_use]
pub(crate) fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}
