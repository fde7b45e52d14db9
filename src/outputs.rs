//! Stage output payloads.
//!
//! Every pipeline stage produces exactly one of the structs in this module.
//! They are plain serde data: the engine folds them into
//! [`ConversationState`](crate::state::ConversationState) and checkpoints
//! serialize them verbatim, so additions here must stay
//! backward-deserializable (new fields take `#[serde(default)]`).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Detected intent of an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Inquiry,
    Pricing,
    Scheduling,
    Complaint,
    Support,
    Legal,
    OffTopic,
}

impl Intent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Inquiry => "inquiry",
            Intent::Pricing => "pricing",
            Intent::Scheduling => "scheduling",
            Intent::Complaint => "complaint",
            Intent::Support => "support",
            Intent::Legal => "legal",
            Intent::OffTopic => "off_topic",
        }
    }
}

/// Handling priority assigned by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Classifier stage output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub priority: Priority,
    /// Model self-reported confidence, clamped to `[0.0, 1.0]`.
    pub confidence: f64,
    /// Whether the message carries enough substance to warrant profile
    /// extraction and retrieval.
    pub needs_extraction: bool,
    /// The user explicitly asked for a human.
    #[serde(default)]
    pub escalate: bool,
}

/// Knowledge domain a message was matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeDomain {
    Product,
    Pricing,
    Financing,
    Process,
    General,
}

/// Deterministic escalation triggers, listed in detection priority order.
///
/// When several triggers match the same message, the one declared first here
/// wins. Keep this ordering stable: it is observable in escalation reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    LegalCompliance,
    ExplicitComplaint,
    DomainExpertRequired,
    ComplexFinancial,
    RepeatedConfusion,
}

impl EscalationTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationTrigger::LegalCompliance => "legal_compliance",
            EscalationTrigger::ExplicitComplaint => "explicit_complaint",
            EscalationTrigger::DomainExpertRequired => "domain_expert_required",
            EscalationTrigger::ComplexFinancial => "complex_financial",
            EscalationTrigger::RepeatedConfusion => "repeated_confusion",
        }
    }
}

/// Knowledge stage output: either an escalation trigger fired, or the message
/// was matched to a domain with zero or more supporting snippets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeOutcome {
    pub domain: KnowledgeDomain,
    pub snippets: Vec<String>,
    pub trigger: Option<EscalationTrigger>,
}

/// Structured lead profile accumulated across the conversation.
///
/// All fields are optional; extraction merges newly learned values over what
/// previous turns established and never erases a known value with `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedProfile {
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub timeframe: Option<String>,
    pub quantity: Option<u32>,
    pub features: Option<Vec<String>>,
    pub contact_email: Option<String>,
}

impl ExtractedProfile {
    /// Number of extractable fields; the denominator of the coverage ratio.
    pub const FIELD_COUNT: usize = 8;

    /// Counts fields with a known value.
    #[must_use]
    pub fn filled_fields(&self) -> usize {
        [
            self.budget_min.is_some(),
            self.budget_max.is_some(),
            self.category.is_some(),
            self.location.is_some(),
            self.timeframe.is_some(),
            self.quantity.is_some(),
            self.features.as_ref().is_some_and(|f| !f.is_empty()),
            self.contact_email.is_some(),
        ]
        .into_iter()
        .filter(|filled| *filled)
        .count()
    }

    /// Merges `newer` over `self`: known values in `newer` win, `None` in
    /// `newer` preserves what `self` already learned.
    #[must_use]
    pub fn merged_with(&self, newer: &ExtractedProfile) -> ExtractedProfile {
        ExtractedProfile {
            budget_min: newer.budget_min.or(self.budget_min),
            budget_max: newer.budget_max.or(self.budget_max),
            category: newer.category.clone().or_else(|| self.category.clone()),
            location: newer.location.clone().or_else(|| self.location.clone()),
            timeframe: newer.timeframe.clone().or_else(|| self.timeframe.clone()),
            quantity: newer.quantity.or(self.quantity),
            features: newer.features.clone().or_else(|| self.features.clone()),
            contact_email: newer
                .contact_email
                .clone()
                .or_else(|| self.contact_email.clone()),
        }
    }
}

/// Extraction stage output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub profile: ExtractedProfile,
    /// Field coverage ratio floored at the configured minimum.
    pub confidence: f64,
}

/// A catalog record as returned by the search backend, before ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub title: String,
    pub category: String,
    pub price: Option<f64>,
    pub summary: String,
    /// Lower is more authoritative. Curated sources use 0.
    pub source_priority: u8,
    #[serde(default)]
    pub attributes: BTreeSet<String>,
    /// Days since the record was last refreshed.
    #[serde(default)]
    pub age_days: u32,
}

/// A candidate with its final composite rank score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub record: CandidateRecord,
    pub score: f64,
}

/// Retrieval stage output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Normalized query the search ran with.
    pub query: String,
    pub records: Vec<RankedRecord>,
    pub from_cache: bool,
}

/// The three additive scoring components. Each is clamped to its band before
/// summation, so `total` is always in `0..=100`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// Profile and inventory fit, `0..=40`.
    pub fit: u8,
    /// Conversation engagement, `0..=35`.
    pub engagement: u8,
    /// Purchase readiness, `0..=25`.
    pub readiness: u8,
}

impl ScoreComponents {
    #[must_use]
    pub fn total(&self) -> u8 {
        self.fit + self.engagement + self.readiness
    }
}

/// Lead quality tier derived from the total score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Cold,
    Warm,
    Hot,
}

impl QualityTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Cold => "cold",
            QualityTier::Warm => "warm",
            QualityTier::Hot => "hot",
        }
    }
}

/// Behavioral signals observed while scoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorFlags {
    pub scheduling_requested: bool,
    pub budget_disclosed: bool,
    pub repeated_contact: bool,
}

/// Scoring stage output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadScore {
    pub components: ScoreComponents,
    pub total: u8,
    pub tier: QualityTier,
    /// Human-readable qualification tags, sorted for stable output.
    pub tags: BTreeSet<String>,
    pub flags: BehaviorFlags,
}

/// Detected emotional register of the user's latest message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Frustrated,
}

/// Follow-up action recommended for the lead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Escalate,
    Schedule,
    FollowUp,
    Nurture,
}

/// Responder stage output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    pub reply: String,
    pub sentiment: Sentiment,
    /// Provisional until scoring finalizes it through
    /// [`recommended_action`].
    pub next_action: NextAction,
    /// Responder's judgment that another retrieval pass would materially
    /// improve the reply.
    pub needs_more_retrieval: bool,
}

/// Why a turn escalated to a human.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    ExplicitFlag,
    LowConfidence,
    EscalationIntent,
    Trigger(EscalationTrigger),
    PipelineFailure,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::ExplicitFlag => f.write_str("explicit_flag"),
            EscalationReason::LowConfidence => f.write_str("low_confidence"),
            EscalationReason::EscalationIntent => f.write_str("escalation_intent"),
            EscalationReason::Trigger(trigger) => f.write_str(trigger.as_str()),
            EscalationReason::PipelineFailure => f.write_str("pipeline_failure"),
        }
    }
}

/// Notifier stage output: which channels were reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub escalation_id: String,
    /// Channel names that accepted the hand-off.
    pub delivered: Vec<String>,
    /// Channel names that refused or errored.
    pub failed: Vec<String>,
}

impl EscalationReport {
    /// True when at least one channel accepted the hand-off.
    #[must_use]
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// How the turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Complete,
    Escalated,
    Failed,
}

/// Final next action for the lead, in fixed priority order: escalation beats
/// an observed scheduling request, which beats the tier default.
#[must_use]
pub fn recommended_action(
    escalate: bool,
    flags: &BehaviorFlags,
    tier: QualityTier,
) -> NextAction {
    if escalate {
        return NextAction::Escalate;
    }
    if flags.scheduling_requested {
        return NextAction::Schedule;
    }
    match tier {
        QualityTier::Hot => NextAction::Schedule,
        QualityTier::Warm => NextAction::FollowUp,
        QualityTier::Cold => NextAction::Nurture,
    }
}
