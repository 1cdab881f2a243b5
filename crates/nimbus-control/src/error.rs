//! Error types for nimbus-control.

use std::time::Duration;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors raised while driving a deployment.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The background create call failed.
    #[error("failed to create container group {container_group}: {source}")]
    CreationFailure {
        /// Target container group.
        container_group: String,
        /// Error reported by the platform.
        source: Box<ControlError>,
    },

    /// The workload finished in a failed state.
    #[error("container group {container_group} failed (transaction {transaction_id})")]
    TerminalFailure {
        /// Caller-supplied correlation id.
        transaction_id: String,
        /// Target container group.
        container_group: String,
    },

    /// Logs are not yet available for the container.
    #[error("logs unavailable: {0}")]
    LogsUnavailable(String),

    /// Log retrieval kept failing until the retry budget ran out.
    #[error("log retrieval gave up after {attempts} attempts: {last}")]
    LogRetrievalExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure from the final attempt.
        #[source]
        last: Box<ControlError>,
    },

    /// The inbound request could not be decoded or failed validation.
    #[error("malformed deployment request: {0}")]
    MalformedRequest(String),

    /// The platform rejected the supplied credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The container group does not exist.
    #[error("container group not found: {0}")]
    ContainerGroupNotFound(String),

    /// Any other platform-side failure.
    #[error("platform error: {0}")]
    Platform(String),

    /// The overall deployment deadline elapsed.
    #[error("deployment {transaction_id} did not finish within {after:?}")]
    DeadlineExceeded {
        /// Caller-supplied correlation id.
        transaction_id: String,
        /// Configured deadline.
        after: Duration,
    },

    /// The deployment was cancelled.
    #[error("deployment cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a platform error.
    #[must_use]
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a malformed-request error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure stems from the workload or its creation rather
    /// than from the controller's own budgets.
    #[must_use]
    pub fn is_workload_failure(&self) -> bool {
        matches!(
            self,
            Self::CreationFailure { .. } | Self::TerminalFailure { .. }
        )
    }
}
