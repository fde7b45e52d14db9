//! In-process event stream.
//!
//! Stages and the engine publish structured events onto a flume channel; a
//! background listener fans them out to registered [`EventSink`]s. The bus is
//! strictly observational: dropped or failed events never affect a turn's
//! outcome.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::types::Stage;

/// Something observable happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Stage(StageEvent),
    Turn(TurnEvent),
}

/// A message emitted from inside a stage run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub attempt: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A turn-level lifecycle note from the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnEvent {
    pub thread_id: String,
    pub message_id: String,
    pub note: String,
    pub at: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn stage(stage: Stage, attempt: u32, message: String) -> Self {
        Event::Stage(StageEvent {
            stage,
            attempt,
            message,
            at: Utc::now(),
        })
    }

    #[must_use]
    pub fn turn(thread_id: &str, message_id: &str, note: impl Into<String>) -> Self {
        Event::Turn(TurnEvent {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            note: note.into(),
            at: Utc::now(),
        })
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum EventError {
    #[error("event channel closed")]
    #[diagnostic(code(leadflow::events::closed))]
    ChannelClosed,
}

/// Receives every event published to the bus, in publish order.
pub trait EventSink: Send {
    fn on_event(&mut self, event: &Event);
}

/// Writes events as single lines to stdout. Development convenience.
#[derive(Debug, Default)]
pub struct StdOutSink;

impl EventSink for StdOutSink {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::Stage(e) => {
                println!("[{}] {} #{}: {}", e.at.format("%H:%M:%S"), e.stage, e.attempt, e.message);
            }
            Event::Turn(e) => {
                println!("[{}] turn {}/{}: {}", e.at.format("%H:%M:%S"), e.thread_id, e.message_id, e.note);
            }
        }
    }
}

/// Buffers events in memory. Tests read them back with [`MemorySink::snapshot`].
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn on_event(&mut self, event: &Event) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}

/// Forwards events onto another flume channel, for external consumers.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: flume::Sender<Event>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: flume::Sender<Event>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: &Event) {
        // Receiver gone means nobody is listening anymore; nothing to do.
        let _ = self.sender.send(event.clone());
    }
}

/// Cheap cloneable handle for publishing events.
#[derive(Clone)]
pub struct EventEmitter {
    sender: flume::Sender<Event>,
}

impl EventEmitter {
    pub fn emit(&self, event: Event) -> Result<(), EventError> {
        self.sender.send(event).map_err(|_| EventError::ChannelClosed)
    }

    /// Stage-scoped emission that swallows channel errors. Stages call this
    /// on the hot path where observability must not fail the turn.
    pub fn emit_stage(&self, stage: Stage, attempt: u32, message: String) {
        if self.emit(Event::stage(stage, attempt, message)).is_err() {
            tracing::debug!(%stage, "event bus closed, dropping stage event");
        }
    }

    /// Turn-scoped emission, same error policy as [`EventEmitter::emit_stage`].
    pub fn emit_turn(&self, thread_id: &str, message_id: &str, note: impl Into<String>) {
        if self.emit(Event::turn(thread_id, message_id, note)).is_err() {
            tracing::debug!(thread_id, "event bus closed, dropping turn event");
        }
    }

    /// An emitter wired to nothing. Events are dropped silently.
    #[must_use]
    pub fn disconnected() -> Self {
        let (sender, _receiver) = flume::unbounded();
        Self { sender }
    }
}

/// The bus itself: owns the channel and the listener task.
pub struct EventBus {
    sender: flume::Sender<Event>,
    shutdown: Option<oneshot::Sender<()>>,
    listener: Option<JoinHandle<()>>,
}

impl EventBus {
    /// Starts a bus fanning out to the given sinks. Must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn start(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (sender, receiver) = flume::unbounded::<Event>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let listener = tokio::spawn(async move {
            let mut sinks = sinks;
            loop {
                tokio::select! {
                    incoming = receiver.recv_async() => match incoming {
                        Ok(event) => {
                            for sink in &mut sinks {
                                sink.on_event(&event);
                            }
                        }
                        Err(_) => break,
                    },
                    _ = &mut shutdown_rx => {
                        // Drain whatever was already queued before stopping.
                        while let Ok(event) = receiver.try_recv() {
                            for sink in &mut sinks {
                                sink.on_event(&event);
                            }
                        }
                        break;
                    }
                }
            }
        });
        Self {
            sender,
            shutdown: Some(shutdown_tx),
            listener: Some(listener),
        }
    }

    #[must_use]
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            sender: self.sender.clone(),
        }
    }

    /// Stops the listener after draining queued events.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }
}
