mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::inbound;
use leadflow::config::EngineConfig;
use leadflow::error::StageError;
use leadflow::events::EventEmitter;
use leadflow::executor::NodeExecutor;
use leadflow::metrics::StageMetrics;
use leadflow::node::{StageContext, StageNode, StageUpdate};
use leadflow::providers::TokenUsage;
use leadflow::state::ConversationState;
use leadflow::types::Stage;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.backoff_min = Duration::from_millis(1);
    config.retry.backoff_max = Duration::from_millis(5);
    config
}

fn executor(config: EngineConfig) -> (NodeExecutor, Arc<StageMetrics>) {
    let metrics = Arc::new(StageMetrics::new());
    let executor = NodeExecutor::new(
        Arc::new(config),
        Arc::clone(&metrics),
        EventEmitter::disconnected(),
    );
    (executor, metrics)
}

/// Fails with a transient error a fixed number of times, then succeeds.
struct FlakyNode {
    failures_left: AtomicU32,
    usage: TokenUsage,
}

impl FlakyNode {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            usage: TokenUsage::new(1_000, 100),
        }
    }
}

#[async_trait]
impl StageNode for FlakyNode {
    fn stage(&self) -> Stage {
        Stage::Respond
    }

    async fn run(
        &self,
        _state: &ConversationState,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StageError::Transient {
                provider: "llm".into(),
                message: "rate limited".into(),
            });
        }
        Ok(StageUpdate::usage_only(self.usage))
    }
}

struct ValidationFailNode;

#[async_trait]
impl StageNode for ValidationFailNode {
    fn stage(&self) -> Stage {
        Stage::Classify
    }

    async fn run(
        &self,
        _state: &ConversationState,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        Err(StageError::Validation("bad json".into()))
    }
}

struct SlowNode;

#[async_trait]
impl StageNode for SlowNode {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn run(
        &self,
        _state: &ConversationState,
        _ctx: StageContext,
    ) -> Result<StageUpdate, StageError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(StageUpdate::default())
    }
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let (executor, metrics) = executor(fast_config());
    let node = FlakyNode::new(2);
    let mut state = inbound("m-1", "t-1", "hello");
    executor.execute(&node, &mut state).await.unwrap();
    assert_eq!(state.retry_count, 2);
    assert_eq!(state.usage.input, 1_000);
    let stats = metrics.for_stage(Stage::Respond).unwrap();
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn retries_exhaust_into_an_error() {
    let (executor, metrics) = executor(fast_config());
    let node = FlakyNode::new(10);
    let mut state = inbound("m-1", "t-1", "hello");
    let err = executor.execute(&node, &mut state).await.unwrap_err();
    assert!(err.is_retryable());
    // max_attempts = 3: two retries, then the third failure surfaces.
    assert_eq!(state.retry_count, 2);
    assert!(state.error.is_some());
    let stats = metrics.for_stage(Stage::Respond).unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.retries, 2);
}

#[tokio::test]
async fn validation_errors_never_retry() {
    let (executor, metrics) = executor(fast_config());
    let mut state = inbound("m-1", "t-1", "hello");
    let err = executor.execute(&ValidationFailNode, &mut state).await.unwrap_err();
    assert!(matches!(err, StageError::Validation(_)));
    assert_eq!(state.retry_count, 0);
    let stats = metrics.for_stage(Stage::Classify).unwrap();
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn slow_stages_time_out() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.timeouts.insert(Stage::Extract, Duration::from_millis(10));
    let (executor, _metrics) = executor(config);
    let mut state = inbound("m-1", "t-1", "hello");
    let err = executor.execute(&SlowNode, &mut state).await.unwrap_err();
    assert!(matches!(err, StageError::Timeout { stage: Stage::Extract, .. }));
}

#[tokio::test]
async fn successful_runs_are_billed() {
    let config = fast_config();
    let expected = config.pricing.cost(&TokenUsage::new(1_000, 100));
    let (executor, metrics) = executor(config);
    let node = FlakyNode::new(0);
    let mut state = inbound("m-1", "t-1", "hello");
    executor.execute(&node, &mut state).await.unwrap();
    assert_eq!(state.cost_usd, expected);
    let stats = metrics.for_stage(Stage::Respond).unwrap();
    assert_eq!(stats.cost_usd, expected);
    assert_eq!(stats.usage.output, 100);
}
