//! TTL-bounded in-memory stores: the processed-message marker used for
//! duplicate suppression, and the retrieval result cache.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::ProviderError;
use crate::outputs::RankedRecord;
use crate::providers::{MarkerStore, SearchQuery};

/// Marker store backed by a process-local map. Suitable for a single-process
/// deployment; multi-process deployments need a shared backend behind the
/// same trait.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    markers: Mutex<FxHashMap<String, Instant>>,
}

impl InMemoryMarkerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn try_acquire(&self, message_id: &str, ttl: Duration) -> Result<bool, ProviderError> {
        let mut markers = self
            .markers
            .lock()
            .map_err(|_| ProviderError::transient("marker_store", "lock poisoned"))?;
        let now = Instant::now();
        markers.retain(|_, expires| *expires > now);
        if markers.contains_key(message_id) {
            return Ok(false);
        }
        markers.insert(message_id.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, message_id: &str) -> Result<(), ProviderError> {
        let mut markers = self
            .markers
            .lock()
            .map_err(|_| ProviderError::transient("marker_store", "lock poisoned"))?;
        markers.remove(message_id);
        Ok(())
    }
}

/// Lowercases, trims, and collapses whitespace so queries that differ only in
/// casing or spacing share a cache entry.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Cache key: normalized query text plus the hard filters. Filters are part
/// of the key because they never appear in the query text; two profiles with
/// the same wording but different budgets must not share an entry.
fn cache_key(query: &SearchQuery) -> String {
    let mut key = normalize_query(&query.text);
    if let Some(category) = &query.filters.category {
        key.push_str("|cat=");
        key.push_str(&category.to_lowercase());
    }
    if let Some(ceiling) = query.filters.price_ceiling {
        key.push_str(&format!("|max={ceiling}"));
    }
    if let Some(floor) = query.filters.price_floor {
        key.push_str(&format!("|min={floor}"));
    }
    key
}

struct CacheEntry {
    records: Vec<RankedRecord>,
    expires: Instant,
}

/// Caches ranked retrieval results keyed by normalized query text and the
/// query's hard filters.
pub struct RetrievalCache {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, CacheEntry>>,
}

impl RetrievalCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Cached records for a query, if an unexpired entry exists.
    #[must_use]
    pub fn get(&self, query: &SearchQuery) -> Option<Vec<RankedRecord>> {
        let key = cache_key(query);
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&key)?;
        (entry.expires > Instant::now()).then(|| entry.records.clone())
    }

    pub fn put(&self, query: &SearchQuery, records: Vec<RankedRecord>) {
        let key = cache_key(query);
        if let Ok(mut entries) = self.entries.lock() {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires > now);
            entries.insert(
                key,
                CacheEntry {
                    records,
                    expires: now + self.ttl,
                },
            );
        }
    }
}
