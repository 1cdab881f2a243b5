//! Persisted orchestration records and their history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key prefix under which instance records are stored.
pub const INSTANCE_PREFIX: &str = "orchestration/";

/// Identifier of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wrap a caller-supplied id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of this instance's record.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{INSTANCE_PREFIX}{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle status of an orchestration instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    /// Created, not yet picked up by a driver.
    Scheduled,
    /// Being driven.
    Running,
    /// Finished with an output.
    Completed,
    /// Finished with an error.
    Failed,
    /// Replaced its history and is about to start a new epoch.
    ContinuedAsNew,
}

impl RuntimeStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ContinuedAsNew => "continued_as_new",
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in an epoch's history. `seq` is the step index in program call
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    ActivityScheduled { seq: u64, name: String, input: Value },
    ActivityCompleted { seq: u64, result: Value },
    ActivityFailed { seq: u64, error: String },
}

impl HistoryEvent {
    #[must_use]
    pub const fn seq(&self) -> u64 {
        match self {
            Self::ActivityScheduled { seq, .. }
            | Self::ActivityCompleted { seq, .. }
            | Self::ActivityFailed { seq, .. } => *seq,
        }
    }
}

/// The single persisted document for an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Caller-chosen or generated identifier.
    pub instance_id: InstanceId,
    /// Registered orchestration name.
    pub program: String,
    /// Execution number, starting at 1.
    pub epoch: u64,
    /// Input of the current epoch.
    pub input: Value,
    /// Lifecycle status.
    pub status: RuntimeStatus,
    /// Events recorded in the current epoch.
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
    /// Last value set by the program, carried across epochs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<Value>,
    /// Program output once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the instance was first started.
    pub created_at: DateTime<Utc>,
    /// Time of the last checkpoint.
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// A fresh record in the `Scheduled` status.
    #[must_use]
    pub fn new(instance_id: InstanceId, program: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            instance_id,
            program: program.into(),
            epoch: 1,
            input,
            status: RuntimeStatus::Scheduled,
            history: Vec::new(),
            custom_status: None,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of steps scheduled in the current epoch.
    #[must_use]
    pub fn scheduled_steps(&self) -> u64 {
        self.history
            .iter()
            .filter(|e| matches!(e, HistoryEvent::ActivityScheduled { .. }))
            .count() as u64
    }

    pub fn mark_running(&mut self) {
        self.status = RuntimeStatus::Running;
        self.touch();
    }

    pub fn append(&mut self, event: HistoryEvent) {
        self.history.push(event);
        self.touch();
    }

    pub fn complete(&mut self, output: Value) {
        self.status = RuntimeStatus::Completed;
        self.output = Some(output);
        self.touch();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RuntimeStatus::Failed;
        self.error = Some(error.into());
        self.touch();
    }

    /// Start the next epoch: history is dropped, custom status is kept.
    pub fn continue_as_new(&mut self, input: Value) {
        self.epoch += 1;
        self.input = input;
        self.history.clear();
        self.status = RuntimeStatus::ContinuedAsNew;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Public view of the record.
    #[must_use]
    pub fn status_view(&self) -> InstanceStatus {
        InstanceStatus {
            instance_id: self.instance_id.clone(),
            program: self.program.clone(),
            runtime_status: self.status,
            custom_status: self.custom_status.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            epoch: self.epoch,
            history_len: self.history.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Result of an instance status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Registered orchestration name.
    pub program: String,
    /// Lifecycle status.
    pub runtime_status: RuntimeStatus,
    /// Last value set by the program.
    pub custom_status: Option<Value>,
    /// Program output once completed.
    pub output: Option<Value>,
    /// Failure message once failed.
    pub error: Option<String>,
    /// Current execution number.
    pub epoch: u64,
    /// Events recorded in the current epoch.
    pub history_len: usize,
    /// When the instance was first started.
    pub created_at: DateTime<Utc>,
    /// Time of the last checkpoint.
    pub updated_at: DateTime<Utc>,
}
