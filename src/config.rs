//! Engine configuration.
//!
//! All tunable behavior lives here so tests can pin it and deployments can
//! override it from the environment. [`EngineConfig::default`] is the
//! production baseline; [`EngineConfig::from_env`] layers `LEADFLOW_*`
//! variables (via `dotenvy`) over it.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::outputs::{Intent, KnowledgeDomain, QualityTier};
use crate::providers::TokenUsage;
use crate::types::Stage;

/// Retry behavior for transient stage failures.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `3` means one run plus two
    /// retries.
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Per-token model prices in USD.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricingTable {
    pub input_per_token: f64,
    pub output_per_token: f64,
    pub cached_per_token: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            input_per_token: 3e-6,
            output_per_token: 15e-6,
            cached_per_token: 0.3e-6,
        }
    }
}

impl PricingTable {
    /// Dollar cost of a usage record, rounded to 6 decimal places so that
    /// accumulated per-turn totals stay stable across summation orders.
    #[must_use]
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let raw = usage.input as f64 * self.input_per_token
            + usage.output as f64 * self.output_per_token
            + usage.cached as f64 * self.cached_per_token;
        (raw * 1e6).round() / 1e6
    }
}

/// Score thresholds separating lead quality tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierBounds {
    pub hot_min: u8,
    pub warm_min: u8,
}

impl Default for TierBounds {
    fn default() -> Self {
        Self {
            hot_min: 80,
            warm_min: 50,
        }
    }
}

impl TierBounds {
    #[must_use]
    pub fn tier_for(&self, total: u8) -> QualityTier {
        if total >= self.hot_min {
            QualityTier::Hot
        } else if total >= self.warm_min {
            QualityTier::Warm
        } else {
            QualityTier::Cold
        }
    }
}

/// Everything the engine and its stages consult at runtime.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Per-stage execution budgets. Stages without an entry use
    /// `default_timeout`.
    pub timeouts: FxHashMap<Stage, Duration>,
    pub default_timeout: Duration,
    /// Wall-clock budget for a whole turn, checkpoint included. `None`
    /// disables the outer deadline.
    pub turn_budget: Option<Duration>,
    pub retry: RetryPolicy,
    pub pricing: PricingTable,
    pub tiers: TierBounds,
    /// Hard cap on retrieve/respond loop passes per turn.
    pub max_retrieval_iterations: u32,
    /// Classifier confidence below this escalates the turn.
    pub confidence_threshold: f64,
    /// Floor applied to the extraction coverage ratio.
    pub min_extraction_confidence: f64,
    /// Intents that bypass the pipeline and escalate directly.
    pub escalation_intents: Vec<Intent>,
    /// Duplicate-suppression window for message ids.
    pub dedup_ttl: Duration,
    pub retrieval_top_k: usize,
    pub retrieval_cache_ttl: Duration,
    /// How many recent user turns the repeated-confusion check compares.
    pub confusion_window: usize,
    /// Token-overlap ratio at or above which turns count as repeats.
    pub confusion_overlap: f64,
    /// How many history turns are rendered into model prompts.
    pub history_window: usize,
    /// Canned knowledge text attached per matched domain.
    pub knowledge_snippets: FxHashMap<KnowledgeDomain, Vec<String>>,
    /// Stage-specific canned replies used when a turn fails.
    pub fallback_replies: FxHashMap<Stage, String>,
    pub default_fallback: String,
    /// Acknowledgment sent when a turn is handed to a human.
    pub escalation_reply: String,
}

fn default_knowledge_snippets() -> FxHashMap<KnowledgeDomain, Vec<String>> {
    let sets: &[(KnowledgeDomain, &[&str])] = &[
        (
            KnowledgeDomain::Financing,
            &[
                "Most buyers start with a pre-approval letter; it takes a day or two and makes offers stronger.",
                "We work with several lenders and can share current rate sheets on request.",
            ],
        ),
        (
            KnowledgeDomain::Pricing,
            &[
                "List prices are set from recent comparable sales; we can share the comps behind any listing.",
                "Buyer-side services carry no fee to you; sellers pay commission at closing.",
            ],
        ),
        (
            KnowledgeDomain::Process,
            &[
                "A typical purchase runs offer, inspection, appraisal, then closing, usually 30 to 45 days.",
                "We handle the paperwork end to end and flag every deadline for you.",
            ],
        ),
        (
            KnowledgeDomain::Product,
            &[
                "Inventory updates daily; saved-search alerts go out within the hour of a new match.",
                "Every listing page includes a floor plan and a disclosure packet.",
            ],
        ),
    ];
    sets.iter()
        .map(|(domain, texts)| {
            (*domain, texts.iter().map(|s| (*s).to_string()).collect())
        })
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut fallback_replies = FxHashMap::default();
        fallback_replies.insert(
            Stage::Retrieve,
            "I couldn't pull up matching listings just now. Let me have a teammate \
             follow up with options shortly."
                .to_string(),
        );
        fallback_replies.insert(
            Stage::Respond,
            "I'm having trouble composing a full answer right now. A teammate will \
             pick this up and get back to you soon."
                .to_string(),
        );
        Self {
            timeouts: FxHashMap::default(),
            default_timeout: Duration::from_secs(20),
            turn_budget: Some(Duration::from_secs(120)),
            retry: RetryPolicy::default(),
            pricing: PricingTable::default(),
            tiers: TierBounds::default(),
            max_retrieval_iterations: 3,
            confidence_threshold: 0.4,
            min_extraction_confidence: 0.1,
            escalation_intents: vec![Intent::Complaint, Intent::Legal],
            dedup_ttl: Duration::from_secs(24 * 60 * 60),
            retrieval_top_k: 5,
            retrieval_cache_ttl: Duration::from_secs(600),
            confusion_window: 3,
            confusion_overlap: 0.5,
            history_window: 12,
            knowledge_snippets: default_knowledge_snippets(),
            fallback_replies,
            default_fallback: "Sorry, something went wrong on our side. A teammate \
                               will reach out to you directly."
                .to_string(),
            escalation_reply: "Thanks for flagging this. I'm bringing in a teammate \
                               who can help directly; they'll reach out shortly."
                .to_string(),
        }
    }
}

impl EngineConfig {
    /// Execution budget for a stage.
    #[must_use]
    pub fn timeout_for(&self, stage: Stage) -> Duration {
        self.timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Canned knowledge text for a matched domain.
    #[must_use]
    pub fn snippets_for(&self, domain: KnowledgeDomain) -> Vec<String> {
        self.knowledge_snippets
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Reply to send when the given stage sank the turn.
    #[must_use]
    pub fn fallback_reply(&self, stage: Stage) -> &str {
        self.fallback_replies
            .get(&stage)
            .map_or(self.default_fallback.as_str(), String::as_str)
    }

    /// Builds a config from the environment, falling back to defaults for
    /// anything unset or unparsable. Loads `.env` first when present.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("LEADFLOW_DEFAULT_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEADFLOW_TURN_BUDGET_SECS") {
            config.turn_budget = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = env_parse::<u32>("LEADFLOW_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(iterations) = env_parse::<u32>("LEADFLOW_MAX_RETRIEVAL_ITERATIONS") {
            config.max_retrieval_iterations = iterations;
        }
        if let Some(threshold) = env_parse::<f64>("LEADFLOW_CONFIDENCE_THRESHOLD") {
            config.confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(secs) = env_parse::<u64>("LEADFLOW_DEDUP_TTL_SECS") {
            config.dedup_ttl = Duration::from_secs(secs);
        }
        if let Some(top_k) = env_parse::<usize>("LEADFLOW_RETRIEVAL_TOP_K") {
            config.retrieval_top_k = top_k.max(1);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_rounds_to_six_decimals() {
        let pricing = PricingTable::default();
        let usage = TokenUsage {
            input: 1234,
            output: 567,
            cached: 89,
        };
        let cost = pricing.cost(&usage);
        assert_eq!(cost, (cost * 1e6).round() / 1e6);
        assert!(cost > 0.0);
    }

    #[test]
    fn tier_thresholds_are_inclusive() {
        let bounds = TierBounds::default();
        assert_eq!(bounds.tier_for(80), QualityTier::Hot);
        assert_eq!(bounds.tier_for(79), QualityTier::Warm);
        assert_eq!(bounds.tier_for(50), QualityTier::Warm);
        assert_eq!(bounds.tier_for(49), QualityTier::Cold);
    }

    #[test]
    fn fallback_falls_through_to_default() {
        let config = EngineConfig::default();
        assert!(config.fallback_replies.contains_key(&Stage::Respond));
        assert_eq!(
            config.fallback_reply(Stage::Classify),
            config.default_fallback
        );
    }
}
