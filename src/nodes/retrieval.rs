//! Catalog retrieval.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::RetrievalCache;
use crate::config::EngineConfig;
use crate::error::StageError;
use crate::node::{StageContext, StageNode, StageOutput, StageUpdate};
use crate::outputs::{ExtractedProfile, RetrievalOutcome};
use crate::providers::{SearchFilters, SearchQuery, VectorSearch};
use crate::search::{RankWeights, rank_candidates};
use crate::state::ConversationState;
use crate::types::Stage;

/// Builds the search query text from the profile, falling back to the raw
/// message when the profile has nothing usable.
fn query_text(profile: &ExtractedProfile, message: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(category) = &profile.category {
        parts.push(category.clone());
    }
    if let Some(location) = &profile.location {
        parts.push(location.clone());
    }
    if let Some(features) = &profile.features {
        parts.extend(features.iter().cloned());
    }
    if let Some(timeframe) = &profile.timeframe {
        parts.push(timeframe.clone());
    }
    if parts.is_empty() {
        message.to_string()
    } else {
        parts.join(" ")
    }
}

/// Runs the catalog search for the extracted profile, ranks the candidates,
/// and caches results per normalized query. Requires extraction to have run.
pub struct RetrievalNode {
    search: Arc<dyn VectorSearch>,
    cache: Arc<RetrievalCache>,
    weights: RankWeights,
    config: Arc<EngineConfig>,
}

impl RetrievalNode {
    #[must_use]
    pub fn new(
        search: Arc<dyn VectorSearch>,
        cache: Arc<RetrievalCache>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            search,
            cache,
            weights: RankWeights::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_weights(mut self, weights: RankWeights) -> Self {
        self.weights = weights;
        self
    }
}

#[async_trait]
impl StageNode for RetrievalNode {
    fn stage(&self) -> Stage {
        Stage::Retrieve
    }

    async fn run(
        &self,
        state: &ConversationState,
        ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        let profile = state
            .extraction
            .as_ref()
            .map(|e| &e.profile)
            .ok_or(StageError::MissingInput {
                what: "extraction before retrieval",
            })?;

        let text = query_text(profile, &state.text);
        let query = SearchQuery {
            text: text.clone(),
            filters: SearchFilters {
                category: profile.category.clone(),
                price_ceiling: profile.budget_max,
                price_floor: profile.budget_min,
            },
            top_k: self.config.retrieval_top_k,
        };
        // The cache keys on text plus filters, so a hit is guaranteed to
        // satisfy this profile's hard constraints.
        if let Some(records) = self.cache.get(&query) {
            ctx.emit(format!("cache hit for query \"{text}\""));
            return Ok(StageUpdate::output(StageOutput::Retrieval(RetrievalOutcome {
                query: text,
                records,
                from_cache: true,
            })));
        }

        let candidates = self.search.search(&query).await?;
        let mut records = rank_candidates(&text, profile, candidates, &self.weights);
        records.truncate(self.config.retrieval_top_k);
        ctx.emit(format!("{} records for query \"{text}\"", records.len()));
        self.cache.put(&query, records.clone());
        Ok(StageUpdate::output(StageOutput::Retrieval(RetrievalOutcome {
            query: text,
            records,
            from_cache: false,
        })))
    }
}
