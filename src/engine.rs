//! Turn orchestration.
//!
//! [`Engine::run`] takes a fresh [`ConversationState`] through the pipeline:
//! duplicate suppression, optional resumption from a mid-turn checkpoint, the
//! stage loop with conditional routing, and terminal handling. Stage failures
//! degrade into a `Failed` terminal with a fallback reply rather than an
//! error; [`EngineError`] is reserved for turns that cannot produce a state.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::cache::{InMemoryMarkerStore, RetrievalCache};
use crate::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use crate::config::EngineConfig;
use crate::error::{EngineError, StageError};
use crate::events::{EventBus, EventEmitter, EventSink};
use crate::executor::NodeExecutor;
use crate::metrics::StageMetrics;
use crate::node::StageNode;
use crate::nodes::{
    ClassifierNode, EscalationNotifierNode, ExtractorNode, KnowledgeNode, ResponderNode,
    RetrievalNode, ScorerNode, sentiment_of,
};
use crate::outputs::{EscalationReason, NextAction, ResponseOutcome, Terminal};
use crate::providers::{EscalationChannel, MarkerStore, ReasoningClient, VectorSearch};
use crate::router::{Route, route_after_classifier, route_after_knowledge, route_after_response};
use crate::search::InMemorySearchIndex;
use crate::state::ConversationState;
use crate::types::Stage;

/// Construction-time failure of [`EngineBuilder::build`].
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("no reasoning client configured")]
    #[diagnostic(
        code(leadflow::build::missing_client),
        help("Call EngineBuilder::with_reasoning_client before build().")
    )]
    MissingReasoningClient,
}

/// The conversation engine. Cheap to share behind an `Arc`; worker pools
/// clone the handle, not the engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    nodes: FxHashMap<Stage, Arc<dyn StageNode>>,
    checkpoints: Arc<dyn CheckpointStore>,
    markers: Arc<dyn MarkerStore>,
    metrics: Arc<StageMetrics>,
    executor: NodeExecutor,
    emitter: EventEmitter,
    // Keeps the listener task alive for the engine's lifetime.
    _bus: Option<EventBus>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Processes one inbound message to a terminal state.
    ///
    /// Returns `Ok` with a terminal state for completed, escalated, and
    /// failed turns alike. `Err` means no state could be produced: the
    /// message was a duplicate, the turn ran past its budget, or checkpoint
    /// storage failed fatally.
    #[instrument(skip(self, state), fields(thread_id = %state.thread_id, message_id = %state.message_id))]
    pub async fn run(&self, mut state: ConversationState) -> Result<ConversationState, EngineError> {
        let acquired = match self
            .markers
            .try_acquire(&state.message_id, self.config.dedup_ttl)
            .await
        {
            Ok(acquired) => acquired,
            // Fail open: double-processing a message beats silently dropping
            // it when the marker store is down.
            Err(err) => {
                tracing::warn!(error = %err, "marker store unavailable, skipping dedup");
                true
            }
        };
        if !acquired {
            // A held marker plus a mid-turn checkpoint for this exact message
            // means the prior delivery crashed before finishing (finished
            // turns delete their checkpoint). Resume instead of suppressing.
            let resumable = matches!(
                self.checkpoints.load_latest(&state.thread_id).await?,
                Some(checkpoint) if checkpoint.message_id == state.message_id
            );
            if !resumable {
                self.emitter
                    .emit_turn(&state.thread_id, &state.message_id, "duplicate suppressed");
                return Err(EngineError::DuplicateMessage);
            }
            info!("held marker with a matching checkpoint, resuming crashed turn");
        }

        let outcome = match self.config.turn_budget {
            Some(budget) => {
                match tokio::time::timeout(budget, self.run_inner(&mut state)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // The checkpoint stays in place; releasing the marker
                        // lets a redelivery resume from it.
                        let _ = self.markers.release(&state.message_id).await;
                        return Err(EngineError::TurnBudgetExceeded {
                            budget_ms: budget.as_millis() as u64,
                        });
                    }
                }
            }
            None => self.run_inner(&mut state).await,
        };
        match outcome {
            Ok(()) => Ok(state),
            Err(err) => {
                let _ = self.markers.release(&state.message_id).await;
                Err(err)
            }
        }
    }

    async fn run_inner(&self, state: &mut ConversationState) -> Result<(), EngineError> {
        let mut next = Stage::Classify;
        match self.checkpoints.load_latest(&state.thread_id).await? {
            Some(checkpoint) if checkpoint.message_id == state.message_id => {
                info!(stage = %checkpoint.next_stage, "resuming from checkpoint");
                self.emitter.emit_turn(
                    &state.thread_id,
                    &state.message_id,
                    format!("resumed at {}", checkpoint.next_stage),
                );
                *state = checkpoint.state;
                next = checkpoint.next_stage;
            }
            Some(_) => {
                // Leftover from an earlier message on this thread.
                self.checkpoints.delete(&state.thread_id).await?;
            }
            None => {}
        }

        loop {
            let Some(node) = self.nodes.get(&next) else {
                return self
                    .fail_turn(state, next, &StageError::MissingInput { what: "stage node" })
                    .await;
            };
            let node = Arc::clone(node);
            if let Err(err) = self.executor.execute(node.as_ref(), state).await {
                return self.fail_turn(state, next, &err).await;
            }

            let route = match self.route_from(next, state) {
                Ok(route) => route,
                Err(err) => return self.fail_turn(state, next, &err).await,
            };
            let following = match route {
                Route::To(stage) => stage,
                Route::Escalate(reason) => {
                    // No business stage runs once a turn is escalated: the
                    // user gets the configured acknowledgment and the turn
                    // goes straight to hand-off.
                    state.mark_escalated(reason);
                    if state.response.is_none() {
                        state.response = Some(ResponseOutcome {
                            reply: self.config.escalation_reply.clone(),
                            sentiment: sentiment_of(&state.text),
                            next_action: NextAction::Escalate,
                            needs_more_retrieval: false,
                        });
                    }
                    Stage::Notify
                }
                Route::Finish => {
                    let terminal = if state.escalate {
                        Terminal::Escalated
                    } else {
                        Terminal::Complete
                    };
                    state.finish(terminal);
                    self.checkpoints.delete(&state.thread_id).await?;
                    self.emitter.emit_turn(
                        &state.thread_id,
                        &state.message_id,
                        format!("turn finished: {terminal:?}"),
                    );
                    return Ok(());
                }
            };
            self.checkpoints
                .save(Checkpoint::new(state, following))
                .await?;
            next = following;
        }
    }

    /// The routing table. Fixed edges are inline; conditional hops delegate
    /// to the pure routers.
    fn route_from(&self, stage: Stage, state: &ConversationState) -> Result<Route, StageError> {
        Ok(match stage {
            Stage::Classify => {
                let classification =
                    state
                        .classification
                        .as_ref()
                        .ok_or(StageError::MissingInput {
                            what: "classification output",
                        })?;
                route_after_classifier(classification, &self.config)
            }
            Stage::Knowledge => {
                let outcome = state.knowledge.as_ref().ok_or(StageError::MissingInput {
                    what: "knowledge output",
                })?;
                route_after_knowledge(outcome)
            }
            Stage::Extract => Route::To(Stage::Retrieve),
            Stage::Retrieve => Route::To(Stage::Respond),
            Stage::Respond => route_after_response(state, &self.config),
            Stage::Score | Stage::Notify => Route::Finish,
        })
    }

    /// Degrades a failed turn: fallback reply if none exists yet, escalation
    /// to a human when the user never got a real answer, `Failed` terminal.
    async fn fail_turn(
        &self,
        state: &mut ConversationState,
        stage: Stage,
        err: &StageError,
    ) -> Result<(), EngineError> {
        error!(%stage, error = %err, "stage failed, degrading turn");
        state.error = Some(err.to_string());
        state.mark_escalated(EscalationReason::PipelineFailure);

        let had_response = state.response.is_some();
        if !had_response {
            state.response = Some(ResponseOutcome {
                reply: self.config.fallback_reply(stage).to_string(),
                sentiment: sentiment_of(&state.text),
                next_action: NextAction::Escalate,
                needs_more_retrieval: false,
            });
            // The user got a canned reply; make sure a human follows up.
            if state.escalation_report.is_none() {
                if let Some(notifier) = self.nodes.get(&Stage::Notify) {
                    let notifier = Arc::clone(notifier);
                    if let Err(notify_err) = self.executor.execute(notifier.as_ref(), state).await {
                        error!(error = %notify_err, "escalation hand-off failed during degrade");
                    }
                }
            }
        }

        state.finish(Terminal::Failed);
        self.checkpoints.delete(&state.thread_id).await?;
        self.emitter.emit_turn(
            &state.thread_id,
            &state.message_id,
            format!("turn failed at {stage}"),
        );
        Ok(())
    }
}

/// Assembles an [`Engine`] from providers and config.
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    client: Option<Arc<dyn ReasoningClient>>,
    search: Option<Arc<dyn VectorSearch>>,
    channels: Vec<Arc<dyn EscalationChannel>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    markers: Option<Arc<dyn MarkerStore>>,
    sinks: Vec<Box<dyn EventSink>>,
    overrides: Vec<Arc<dyn StageNode>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_reasoning_client(mut self, client: Arc<dyn ReasoningClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn VectorSearch>) -> Self {
        self.search = Some(search);
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn EscalationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    #[must_use]
    pub fn with_marker_store(mut self, store: Arc<dyn MarkerStore>) -> Self {
        self.markers = Some(store);
        self
    }

    /// Registers an event sink. Providing at least one sink starts the event
    /// bus; `build` must then be called inside a tokio runtime.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replaces the built-in node for the stage the given node reports.
    #[must_use]
    pub fn with_node(mut self, node: Arc<dyn StageNode>) -> Self {
        self.overrides.push(node);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let client = self.client.ok_or(BuildError::MissingReasoningClient)?;
        let config = Arc::new(self.config.unwrap_or_default());
        let search = self
            .search
            .unwrap_or_else(|| Arc::new(InMemorySearchIndex::new()));
        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));
        let markers = self
            .markers
            .unwrap_or_else(|| Arc::new(InMemoryMarkerStore::new()));
        let cache = Arc::new(RetrievalCache::new(config.retrieval_cache_ttl));

        let (bus, emitter) = if self.sinks.is_empty() {
            (None, EventEmitter::disconnected())
        } else {
            let bus = EventBus::start(self.sinks);
            let emitter = bus.emitter();
            (Some(bus), emitter)
        };

        let mut nodes: FxHashMap<Stage, Arc<dyn StageNode>> = FxHashMap::default();
        nodes.insert(
            Stage::Classify,
            Arc::new(ClassifierNode::new(Arc::clone(&client), Arc::clone(&config))),
        );
        nodes.insert(Stage::Knowledge, Arc::new(KnowledgeNode::new(Arc::clone(&config))));
        nodes.insert(
            Stage::Extract,
            Arc::new(ExtractorNode::new(Arc::clone(&client), Arc::clone(&config))),
        );
        nodes.insert(
            Stage::Retrieve,
            Arc::new(RetrievalNode::new(search, cache, Arc::clone(&config))),
        );
        nodes.insert(
            Stage::Respond,
            Arc::new(ResponderNode::new(Arc::clone(&client), Arc::clone(&config))),
        );
        nodes.insert(Stage::Score, Arc::new(ScorerNode::new(config.tiers)));
        nodes.insert(
            Stage::Notify,
            Arc::new(EscalationNotifierNode::new(self.channels)),
        );
        for node in self.overrides {
            nodes.insert(node.stage(), node);
        }

        let metrics = Arc::new(StageMetrics::new());
        let executor = NodeExecutor::new(
            Arc::clone(&config),
            Arc::clone(&metrics),
            emitter.clone(),
        );
        Ok(Engine {
            config,
            nodes,
            checkpoints,
            markers,
            metrics,
            executor,
            emitter,
            _bus: bus,
        })
    }
}
