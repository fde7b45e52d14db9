//! Mid-turn checkpoints.
//!
//! After each completed stage the engine saves the state plus the stage it
//! intends to run next, keyed by thread. If the process dies mid-turn, the
//! next delivery of the same message resumes from the recorded stage instead
//! of re-running (and re-billing) completed ones. Checkpoints are deleted
//! when a turn reaches a terminal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

use crate::state::{ConversationState, SCHEMA_VERSION};
use crate::types::Stage;

/// A resumable position inside a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub thread_id: String,
    pub message_id: String,
    /// Stage to run when resuming.
    pub next_stage: Stage,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(state: &ConversationState, next_stage: Stage) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            message_id: state.message_id.clone(),
            next_stage,
            state: state.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint serialization failed")]
    #[diagnostic(code(leadflow::checkpoint::serde))]
    Serde(#[from] serde_json::Error),

    /// A stored checkpoint was written by an incompatible schema version.
    #[error("checkpoint schema version {found} is not supported (expected {expected})")]
    #[diagnostic(
        code(leadflow::checkpoint::schema),
        help("Stale row from a previous deployment; delete it and reprocess the message.")
    )]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("checkpoint backend failure: {0}")]
    #[diagnostic(code(leadflow::checkpoint::backend))]
    Backend(String),
}

/// Checkpoint persistence. One checkpoint per thread: saving overwrites the
/// previous position for that thread.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;

    /// The latest checkpoint for a thread, if one exists.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError>;

    /// Thread ids with a pending checkpoint, sorted.
    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Serialized row shape shared by persistent backends. Keeping it separate
/// from [`Checkpoint`] lets the storage schema evolve without touching the
/// in-memory type.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub message_id: String,
    pub next_stage: String,
    pub state_json: String,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Checkpoint> for PersistedCheckpoint {
    type Error = CheckpointError;

    fn try_from(checkpoint: &Checkpoint) -> Result<Self, Self::Error> {
        Ok(Self {
            thread_id: checkpoint.thread_id.clone(),
            message_id: checkpoint.message_id.clone(),
            next_stage: checkpoint.next_stage.as_str().to_string(),
            state_json: serde_json::to_string(&checkpoint.state)?,
            schema_version: checkpoint.state.schema_version,
            created_at: checkpoint.created_at,
        })
    }
}

impl TryFrom<PersistedCheckpoint> for Checkpoint {
    type Error = CheckpointError;

    fn try_from(row: PersistedCheckpoint) -> Result<Self, Self::Error> {
        if row.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaMismatch {
                found: row.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        let next_stage = Stage::parse(&row.next_stage).ok_or_else(|| {
            CheckpointError::Backend(format!("unknown stage {:?} in checkpoint row", row.next_stage))
        })?;
        Ok(Self {
            thread_id: row.thread_id,
            message_id: row.message_id,
            next_stage,
            state: serde_json::from_str(&row.state_json)?,
            created_at: row.created_at,
        })
    }
}

/// Process-local checkpoint store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    rows: Mutex<FxHashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| CheckpointError::Backend("lock poisoned".into()))?;
        rows.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| CheckpointError::Backend("lock poisoned".into()))?;
        Ok(rows.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| CheckpointError::Backend("lock poisoned".into()))?;
        rows.remove(thread_id);
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| CheckpointError::Backend("lock poisoned".into()))?;
        let mut threads: Vec<String> = rows.keys().cloned().collect();
        threads.sort();
        Ok(threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::builder()
            .message_id("m-1")
            .thread_id("t-1")
            .contact_id("c-1")
            .text("hello")
            .build()
    }

    #[test]
    fn persisted_round_trip_preserves_position() {
        let checkpoint = Checkpoint::new(&state(), Stage::Extract);
        let row = PersistedCheckpoint::try_from(&checkpoint).expect("persist");
        let restored = Checkpoint::try_from(row).expect("restore");
        assert_eq!(restored.next_stage, Stage::Extract);
        assert_eq!(restored.state, checkpoint.state);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let checkpoint = Checkpoint::new(&state(), Stage::Respond);
        let mut row = PersistedCheckpoint::try_from(&checkpoint).expect("persist");
        row.schema_version = SCHEMA_VERSION + 1;
        assert!(matches!(
            Checkpoint::try_from(row),
            Err(CheckpointError::SchemaMismatch { .. })
        ));
    }
}
