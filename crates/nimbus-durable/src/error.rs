//! Error types for nimbus-durable.

use std::time::Duration;

use nimbus_state::KvError;

use crate::history::InstanceId;

/// Result type alias using [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the orchestration engine itself.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] KvError),

    /// A persisted record or an input could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// No orchestration program is registered under this name.
    #[error("unknown orchestration program: {0}")]
    UnknownProgram(String),

    /// `start_with_id` was called with an id that already has a record.
    #[error("orchestration instance already exists: {0}")]
    InstanceExists(InstanceId),

    /// No record exists for this id.
    #[error("orchestration instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The instance did not reach a terminal status in time.
    #[error("instance {instance_id} did not finish within {after:?}")]
    Timeout {
        /// Instance being waited on.
        instance_id: InstanceId,
        /// Timeout that elapsed.
        after: Duration,
    },
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}

/// Errors an orchestration program can return.
///
/// Anything a program returns fails the instance with the error's message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestrationError {
    /// An activity reported a failure.
    #[error("activity {name} failed: {message}")]
    ActivityFailed {
        /// Activity name.
        name: String,
        /// Failure recorded in history.
        message: String,
    },

    /// An input or output could not be converted.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Replay diverged from the recorded history.
    #[error("replay inconsistency: {0}")]
    ReplayInconsistency(String),

    /// Program-defined failure.
    #[error("{0}")]
    Custom(String),
}

impl OrchestrationError {
    /// Create a program-defined failure.
    #[must_use]
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}

/// Failure reported by an activity. Recorded verbatim as `ActivityFailed`
/// unless the activity was interrupted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActivityError {
    /// Failure message.
    pub message: String,
    /// The activity was stopped before it could finish. Nothing is recorded
    /// and the step runs again when the instance is resumed.
    pub interrupted: bool,
}

impl ActivityError {
    /// Create an activity failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            interrupted: false,
        }
    }

    /// Create an interruption, such as a shutdown arriving mid-step.
    #[must_use]
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            interrupted: true,
        }
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialisation error: {err}"))
    }
}

/// Errors raised by entity hosts.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] KvError),

    /// Persisted state could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// No worker accepted the operation, or it stopped before replying.
    #[error("entity {entity}/{key} worker stopped")]
    WorkerGone {
        /// Entity name.
        entity: &'static str,
        /// Entity key.
        key: String,
    },
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}
