//! Per-stage counters.
//!
//! Lightweight in-process aggregation: calls, errors, retries, token spend,
//! and a fixed-bound latency histogram per stage. [`StageMetrics::snapshot`]
//! clones the table so readers never hold the lock while formatting.

use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::providers::TokenUsage;
use crate::types::Stage;

/// Upper bounds, in milliseconds, of the latency histogram buckets. The last
/// bucket is implicit overflow.
pub const LATENCY_BOUNDS_MS: [u64; 6] = [50, 200, 500, 1_000, 5_000, 20_000];

/// Counts of observed latencies per bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LatencyHistogram {
    buckets: [u64; LATENCY_BOUNDS_MS.len() + 1],
}

impl LatencyHistogram {
    pub fn observe(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let idx = LATENCY_BOUNDS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BOUNDS_MS.len());
        self.buckets[idx] += 1;
    }

    #[must_use]
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

/// Aggregates for one stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageStats {
    pub calls: u64,
    pub errors: u64,
    pub retries: u64,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub latency: LatencyHistogram,
}

/// Thread-safe per-stage metrics table.
#[derive(Debug, Default)]
pub struct StageMetrics {
    stages: Mutex<FxHashMap<Stage, StageStats>>,
}

impl StageMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, stage: Stage, latency: Duration, usage: &TokenUsage, cost: f64) {
        if let Ok(mut table) = self.stages.lock() {
            let stats = table.entry(stage).or_default();
            stats.calls += 1;
            stats.usage.merge(usage);
            stats.cost_usd += cost;
            stats.latency.observe(latency);
        }
    }

    pub fn record_retry(&self, stage: Stage) {
        if let Ok(mut table) = self.stages.lock() {
            table.entry(stage).or_default().retries += 1;
        }
    }

    pub fn record_error(&self, stage: Stage) {
        if let Ok(mut table) = self.stages.lock() {
            table.entry(stage).or_default().errors += 1;
        }
    }

    /// Clone of the current table.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<Stage, StageStats> {
        self.stages
            .lock()
            .map(|table| table.clone())
            .unwrap_or_default()
    }

    /// Stats for one stage, if it has run at all.
    #[must_use]
    pub fn for_stage(&self, stage: Stage) -> Option<StageStats> {
        self.stages
            .lock()
            .ok()
            .and_then(|table| table.get(&stage).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_by_bound() {
        let mut histogram = LatencyHistogram::default();
        histogram.observe(Duration::from_millis(10));
        histogram.observe(Duration::from_millis(200));
        histogram.observe(Duration::from_secs(60));
        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.buckets()[0], 1);
        assert_eq!(histogram.buckets()[1], 1);
        assert_eq!(histogram.buckets()[LATENCY_BOUNDS_MS.len()], 1);
    }

    #[test]
    fn record_call_accumulates() {
        let metrics = StageMetrics::new();
        let usage = TokenUsage::new(100, 20);
        metrics.record_call(Stage::Classify, Duration::from_millis(80), &usage, 0.001);
        metrics.record_call(Stage::Classify, Duration::from_millis(90), &usage, 0.001);
        metrics.record_retry(Stage::Classify);
        let stats = metrics.for_stage(Stage::Classify).expect("stats");
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.usage.input, 200);
        assert!(metrics.for_stage(Stage::Score).is_none());
    }
}
