use serde::{Deserialize, Serialize};

/// Identifies one stage of the conversation pipeline.
///
/// Stages are the routing vocabulary of the engine: routers return the next
/// `Stage` to run, checkpoints record the `Stage` to resume at, and metrics
/// aggregate per `Stage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Intent and priority classification of the inbound message.
    Classify,
    /// Escalation-trigger scan and knowledge-base lookup.
    Knowledge,
    /// Structured profile extraction from the conversation.
    Extract,
    /// Catalog retrieval driven by the extracted profile.
    Retrieve,
    /// Reply generation.
    Respond,
    /// Lead quality scoring.
    Score,
    /// Escalation hand-off to configured channels.
    Notify,
}

impl Stage {
    /// Stable string form used in checkpoints, events, and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Knowledge => "knowledge",
            Stage::Extract => "extract",
            Stage::Retrieve => "retrieve",
            Stage::Respond => "respond",
            Stage::Score => "score",
            Stage::Notify => "notify",
        }
    }

    /// Parses the stable string form produced by [`Stage::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classify" => Some(Stage::Classify),
            "knowledge" => Some(Stage::Knowledge),
            "extract" => Some(Stage::Extract),
            "retrieve" => Some(Stage::Retrieve),
            "respond" => Some(Stage::Respond),
            "score" => Some(Stage::Score),
            "notify" => Some(Stage::Notify),
            _ => None,
        }
    }

    /// All stages, in canonical pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Classify,
        Stage::Knowledge,
        Stage::Extract,
        Stage::Retrieve,
        Stage::Respond,
        Stage::Score,
        Stage::Notify,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
