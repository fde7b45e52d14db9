//! Error taxonomy.
//!
//! Three layers, matching who handles them: [`ProviderError`] comes back from
//! external seams, [`StageError`] is what a stage run can fail with (and
//! carries retryability), and [`EngineError`] is what callers of
//! [`Engine::run`](crate::engine::Engine::run) see when a turn cannot produce
//! a state at all.

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::types::Stage;

/// Failure from an external service behind one of the provider traits.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// Transient infrastructure failure: timeouts on the provider side, rate
    /// limits, connection resets. Safe to retry.
    #[error("transient failure from {provider}: {message}")]
    #[diagnostic(
        code(leadflow::provider::transient),
        help("The provider should recover on its own; the executor retries these with backoff.")
    )]
    Transient { provider: String, message: String },

    /// The provider answered, but with something the caller cannot use.
    /// Retrying without changing the request will not help.
    #[error("malformed response from {provider}: {message}")]
    #[diagnostic(
        code(leadflow::provider::malformed),
        help("Inspect the provider response; this usually means a prompt or schema drift.")
    )]
    Malformed { provider: String, message: String },
}

impl ProviderError {
    #[must_use]
    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Failure of one stage run.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// Transient upstream failure, surfaced for the retry loop.
    #[error("transient failure in {provider}: {message}")]
    #[diagnostic(code(leadflow::stage::transient))]
    Transient { provider: String, message: String },

    /// The stage ran past its configured budget.
    #[error("stage {stage} timed out after {after_ms} ms")]
    #[diagnostic(
        code(leadflow::stage::timeout),
        help("Raise the per-stage timeout in EngineConfig or investigate the slow provider.")
    )]
    Timeout { stage: Stage, after_ms: u64 },

    /// The stage got a response it cannot interpret. Not retried.
    #[error("validation failed: {0}")]
    #[diagnostic(code(leadflow::stage::validation))]
    Validation(String),

    /// The stage needs an output an earlier stage never produced. Indicates a
    /// routing bug, not bad input.
    #[error("missing pipeline input: {what}")]
    #[diagnostic(
        code(leadflow::stage::missing_input),
        help("A router sent this stage a state that skipped one of its prerequisites.")
    )]
    MissingInput { what: &'static str },

    #[error("serialization failed: {0}")]
    #[diagnostic(code(leadflow::stage::serde))]
    Serde(#[from] serde_json::Error),
}

impl StageError {
    /// Whether the executor's retry loop should attempt this stage again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient { .. } | StageError::Timeout { .. })
    }
}

impl From<ProviderError> for StageError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient { provider, message } => {
                StageError::Transient { provider, message }
            }
            ProviderError::Malformed { provider, message } => {
                StageError::Validation(format!("{provider}: {message}"))
            }
        }
    }
}

/// Failure of a whole turn.
///
/// Most stage failures do NOT surface here: the engine converts them into a
/// `Failed` terminal state with a fallback reply. `EngineError` is reserved
/// for turns that cannot yield a state at all.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The message id was already processed within the dedup TTL.
    #[error("message already processed")]
    #[diagnostic(
        code(leadflow::engine::duplicate),
        help("Webhook redelivery; drop the message, the original turn already answered it.")
    )]
    DuplicateMessage,

    /// Checkpoint storage failed in a way that makes resumption unsafe.
    #[error("checkpoint store failure")]
    #[diagnostic(code(leadflow::engine::checkpoint))]
    Checkpoint(#[from] CheckpointError),

    /// The turn as a whole ran past the configured turn budget.
    #[error("turn exceeded budget of {budget_ms} ms")]
    #[diagnostic(
        code(leadflow::engine::turn_budget),
        help("Lower stage timeouts or raise turn_budget; the checkpoint allows resumption.")
    )]
    TurnBudgetExceeded { budget_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_variant() {
        assert!(StageError::Transient {
            provider: "llm".into(),
            message: "429".into()
        }
        .is_retryable());
        assert!(StageError::Timeout {
            stage: Stage::Classify,
            after_ms: 5000
        }
        .is_retryable());
        assert!(!StageError::Validation("bad json".into()).is_retryable());
        assert!(!StageError::MissingInput { what: "classification" }.is_retryable());
    }

    #[test]
    fn malformed_provider_errors_become_validation() {
        let err: StageError = ProviderError::malformed("llm", "not json").into();
        assert!(!err.is_retryable());
        assert!(matches!(err, StageError::Validation(_)));
    }
}
