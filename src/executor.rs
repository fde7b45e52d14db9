//! Stage execution: timeouts, retries, and spend accounting.

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::time::Duration;
use tracing::{instrument, warn};

use crate::config::{EngineConfig, RetryPolicy};
use crate::error::StageError;
use crate::events::EventEmitter;
use crate::metrics::StageMetrics;
use crate::node::{StageContext, StageNode};
use crate::state::ConversationState;

/// Backoff before retry number `attempt` (1-based: the delay after the first
/// failed attempt uses `attempt = 1`). Exponential within the policy's
/// min/max band, with multiplicative jitter in `[0.8, 1.2)`.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = policy.backoff_min.as_secs_f64() * policy.multiplier.powi(exponent as i32);
    let capped = base.min(policy.backoff_max.as_secs_f64());
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_secs_f64(capped * jitter)
}

/// Runs stage nodes under the engine's execution policy.
///
/// One call to [`NodeExecutor::execute`] covers the whole retry envelope of a
/// stage: each attempt gets the stage's timeout, transient failures back off
/// and retry up to the policy's attempt budget, and the winning attempt's
/// output and spend are folded into the state. Non-retryable failures record
/// the error on the state and surface it to the engine.
pub struct NodeExecutor {
    config: Arc<EngineConfig>,
    metrics: Arc<StageMetrics>,
    emitter: EventEmitter,
}

impl NodeExecutor {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>, metrics: Arc<StageMetrics>, emitter: EventEmitter) -> Self {
        Self {
            config,
            metrics,
            emitter,
        }
    }

    #[instrument(skip_all, fields(stage = %node.stage()), err)]
    pub async fn execute(
        &self,
        node: &dyn StageNode,
        state: &mut ConversationState,
    ) -> Result<(), StageError> {
        let stage = node.stage();
        let timeout = self.config.timeout_for(stage);
        let mut attempt: u32 = 1;
        loop {
            let ctx = StageContext::new(stage, attempt, self.emitter.clone());
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, node.run(state, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout {
                    stage,
                    after_ms: timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(update) => {
                    let cost = self.config.pricing.cost(&update.usage);
                    self.metrics
                        .record_call(stage, started.elapsed(), &update.usage, cost);
                    self.emitter.emit_stage(
                        stage,
                        attempt,
                        format!(
                            "completed in {} ms ({} tokens, ${cost:.6})",
                            started.elapsed().as_millis(),
                            update.usage.total()
                        ),
                    );
                    state.apply(update, cost);
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < self.config.retry.max_attempts => {
                    self.metrics.record_retry(stage);
                    state.retry_count += 1;
                    let delay = backoff_delay(&self.config.retry, attempt);
                    warn!(
                        %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient stage failure, backing off"
                    );
                    self.emitter
                        .emit_stage(stage, attempt, format!("retrying after {err}"));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics.record_error(stage);
                    self.emitter
                        .emit_stage(stage, attempt, format!("failed: {err}"));
                    state.error = Some(err.to_string());
                    return Err(err);
                }
            }
        }
    }
}
