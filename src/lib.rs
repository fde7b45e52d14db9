//! Multi-stage conversation orchestration for inbound sales leads.
//!
//! An [`Engine`](engine::Engine) takes each inbound message through a
//! pipeline of stages: intent classification, escalation-trigger scanning and
//! knowledge lookup, structured profile extraction, a bounded catalog
//! retrieval loop, reply generation, lead scoring, and, when a turn is handed
//! to a human, escalation delivery. Routing between stages is conditional but
//! pure, every stage is retried and billed by a shared executor, and a
//! checkpoint after each stage makes interrupted turns resumable.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use leadflow::engine::Engine;
//! use leadflow::message::ChannelTag;
//! use leadflow::state::ConversationState;
//! # use leadflow::providers::ReasoningClient;
//! # fn reasoning_client() -> Arc<dyn ReasoningClient> { unimplemented!() }
//!
//! # async fn demo() -> miette::Result<()> {
//! let engine = Engine::builder()
//!     .with_reasoning_client(reasoning_client())
//!     .build()
//!     .map_err(miette::Report::from)?;
//!
//! let state = ConversationState::builder()
//!     .message_id("msg-001")
//!     .thread_id("thread-001")
//!     .contact_id("contact-001")
//!     .channel(ChannelTag::Web)
//!     .text("Looking for a two bedroom condo downtown under 400k")
//!     .build();
//!
//! let finished = engine.run(state).await.map_err(miette::Report::from)?;
//! println!("{:?}: {:?}", finished.terminal, finished.response);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod message;
pub mod metrics;
pub mod node;
pub mod nodes;
pub mod outputs;
pub mod providers;
pub mod router;
pub mod search;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod worker;
