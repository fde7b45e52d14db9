//! Concurrent message intake.
//!
//! A [`WorkerPool`] pulls [`InboundMessage`]s off a shared flume queue and
//! runs each through the engine. Flume's multi-consumer receiver does the
//! load balancing; workers just loop on `recv_async`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::message::{ChannelTag, Turn};
use crate::state::ConversationState;

/// A message as handed over by a channel adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub thread_id: String,
    pub contact_id: String,
    pub channel: ChannelTag,
    pub text: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl InboundMessage {
    /// The initial pipeline state for this message.
    #[must_use]
    pub fn into_state(self) -> ConversationState {
        ConversationState::builder()
            .message_id(self.message_id)
            .thread_id(self.thread_id)
            .contact_id(self.contact_id)
            .channel(self.channel)
            .text(self.text)
            .history(self.history)
            .build()
    }
}

/// A set of worker tasks draining one inbound queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks pulling from `queue`. Workers exit when every
    /// sender side of the queue is dropped.
    #[must_use]
    pub fn spawn(engine: Arc<Engine>, queue: flume::Receiver<InboundMessage>, workers: usize) -> Self {
        let handles = (0..workers)
            .map(|worker_id| {
                let engine = Arc::clone(&engine);
                let queue = queue.clone();
                tokio::spawn(async move {
                    while let Ok(message) = queue.recv_async().await {
                        let thread_id = message.thread_id.clone();
                        let message_id = message.message_id.clone();
                        match engine.run(message.into_state()).await {
                            Ok(state) => {
                                info!(
                                    worker_id,
                                    %thread_id,
                                    terminal = ?state.terminal,
                                    cost_usd = state.cost_usd,
                                    "turn processed"
                                );
                            }
                            // Redeliveries are routine; everything else is not.
                            Err(EngineError::DuplicateMessage) => {
                                debug!(worker_id, %thread_id, %message_id, "duplicate dropped");
                            }
                            Err(err) => {
                                error!(worker_id, %thread_id, %message_id, error = %err, "turn aborted");
                            }
                        }
                    }
                    debug!(worker_id, "queue closed, worker exiting");
                })
            })
            .collect();
        Self { handles }
    }

    /// Waits for all workers to drain and exit.
    pub async fn join(self) {
        for result in futures_util::future::join_all(self.handles).await {
            if let Err(err) = result {
                error!(error = %err, "worker task panicked");
            }
        }
    }
}
