//! Catalog search and ranking.
//!
//! [`InMemorySearchIndex`] is a self-contained [`VectorSearch`] backend with a
//! deterministic token-bucket embedding, so tests and local runs need no
//! external vector store. Ranking is a pure function over candidates and
//! weights; swapping in a remote backend keeps the same ranking behavior.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::error::ProviderError;
use crate::outputs::{CandidateRecord, ExtractedProfile, RankedRecord};
use crate::providers::{SearchQuery, VectorSearch};

/// Dimensionality of the token-bucket embedding.
pub const EMBED_DIM: usize = 64;

/// Deterministic embedding: each lowercase alphanumeric token is hashed into
/// one of [`EMBED_DIM`] buckets, and the resulting count vector is
/// L2-normalized. The same text always embeds identically.
#[must_use]
pub fn embed(text: &str) -> [f32; EMBED_DIM] {
    let mut vector = [0.0_f32; EMBED_DIM];
    for token in tokens(text) {
        let mut hasher = FxHasher::default();
        token.hash(&mut hasher);
        vector[(hasher.finish() as usize) % EMBED_DIM] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Cosine similarity of two embeddings. Inputs are already normalized, so
/// this is a plain dot product.
#[must_use]
pub fn cosine(a: &[f32; EMBED_DIM], b: &[f32; EMBED_DIM]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum()
}

/// Weights of the composite rank score. They need not sum to 1; relative
/// magnitude is what matters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankWeights {
    pub similarity: f64,
    /// Rewards low `source_priority` (more authoritative sources).
    pub authority: f64,
    /// Rewards exact category and feature matches against the profile.
    pub field_match: f64,
    /// Penalizes stale records by age.
    pub recency: f64,
    /// Rewards prices near the profile's budget.
    pub budget_fit: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            authority: 0.15,
            field_match: 0.15,
            recency: 0.1,
            budget_fit: 0.1,
        }
    }
}

/// Scores candidates against the query text and profile, returning them
/// sorted best-first. Ties break on record id so output order is stable.
#[must_use]
pub fn rank_candidates(
    query_text: &str,
    profile: &ExtractedProfile,
    candidates: Vec<CandidateRecord>,
    weights: &RankWeights,
) -> Vec<RankedRecord> {
    let query_vec = embed(query_text);
    let mut ranked: Vec<RankedRecord> = candidates
        .into_iter()
        .map(|record| {
            let similarity = cosine(&query_vec, &embed(&record_text(&record)));
            let authority = 1.0 / (1.0 + f64::from(record.source_priority));
            let fields = field_match(&record, profile);
            let recency = (-(f64::from(record.age_days)) / 180.0).exp();
            let budget = budget_fit(&record, profile);
            let score = weights.similarity * similarity
                + weights.authority * authority
                + weights.field_match * fields
                + weights.recency * recency
                + weights.budget_fit * budget;
            RankedRecord { record, score }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    ranked
}

fn record_text(record: &CandidateRecord) -> String {
    format!("{} {} {}", record.title, record.category, record.summary)
}

fn field_match(record: &CandidateRecord, profile: &ExtractedProfile) -> f64 {
    let mut score = 0.0;
    if let Some(category) = &profile.category {
        if record.category.eq_ignore_ascii_case(category) {
            score += 0.5;
        }
    }
    if let Some(features) = &profile.features {
        if !features.is_empty() {
            let hits = features
                .iter()
                .filter(|f| record.attributes.iter().any(|a| a.eq_ignore_ascii_case(f)))
                .count();
            score += 0.5 * hits as f64 / features.len() as f64;
        }
    }
    score
}

fn budget_fit(record: &CandidateRecord, profile: &ExtractedProfile) -> f64 {
    let (Some(price), Some(target)) = (record.price, budget_target(profile)) else {
        return 0.0;
    };
    if target <= 0.0 {
        return 0.0;
    }
    (1.0 - (price - target).abs() / target).max(0.0)
}

fn budget_target(profile: &ExtractedProfile) -> Option<f64> {
    match (profile.budget_min, profile.budget_max) {
        (Some(min), Some(max)) => Some((min + max) / 2.0),
        (None, Some(max)) => Some(max),
        (Some(min), None) => Some(min),
        (None, None) => None,
    }
}

/// In-process catalog index.
pub struct InMemorySearchIndex {
    records: RwLock<Vec<(CandidateRecord, [f32; EMBED_DIM])>>,
}

impl InMemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Builds an index over the given records.
    #[must_use]
    pub fn with_records(records: Vec<CandidateRecord>) -> Self {
        let index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&self, record: CandidateRecord) {
        let vector = embed(&record_text(&record));
        if let Ok(mut records) = self.records.write() {
            records.push((record, vector));
        }
    }

    fn passes_filters(record: &CandidateRecord, query: &SearchQuery) -> bool {
        if let Some(category) = &query.filters.category {
            if !record.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(ceiling) = query.filters.price_ceiling {
            if record.price.is_some_and(|p| p > ceiling) {
                return false;
            }
        }
        if let Some(floor) = query.filters.price_floor {
            if record.price.is_some_and(|p| p < floor) {
                return false;
            }
        }
        true
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorSearch for InMemorySearchIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, ProviderError> {
        let query_vec = embed(&query.text);
        let records = self
            .records
            .read()
            .map_err(|_| ProviderError::transient("search_index", "lock poisoned"))?;
        let mut matches: Vec<(f64, &CandidateRecord)> = records
            .iter()
            .filter(|(record, _)| Self::passes_filters(record, query))
            .map(|(record, vector)| (cosine(&query_vec, vector), record))
            .collect();
        matches.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        Ok(matches
            .into_iter()
            .take(query.top_k)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let a = embed("two bedroom condo downtown");
        let b = embed("two bedroom condo downtown");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embed(""), [0.0; EMBED_DIM]);
    }

    #[test]
    fn similar_text_scores_higher_than_unrelated() {
        let query = embed("condo downtown");
        let close = cosine(&query, &embed("downtown condo with a view"));
        let far = cosine(&query, &embed("tractor spare parts warehouse"));
        assert!(close > far);
    }
}
