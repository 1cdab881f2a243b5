//! Configuration for nimbus-durable.

use std::time::Duration;

use serde::Deserialize;

/// Engine and entity host tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Capacity of each entity key's mailbox.
    #[serde(default = "default_entity_mailbox_depth")]
    pub entity_mailbox_depth: usize,

    /// How long an entity worker waits for work before shutting down (seconds).
    #[serde(default = "default_entity_idle_timeout_secs")]
    pub entity_idle_timeout_secs: u64,

    /// Interval at which `wait_for_completion` re-reads the instance (milliseconds).
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,
}

const fn default_entity_mailbox_depth() -> usize {
    256
}

const fn default_entity_idle_timeout_secs() -> u64 {
    300
}

const fn default_completion_poll_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_mailbox_depth: default_entity_mailbox_depth(),
            entity_idle_timeout_secs: default_entity_idle_timeout_secs(),
            completion_poll_ms: default_completion_poll_ms(),
        }
    }
}

impl EngineConfig {
    /// Idle timeout for entity workers.
    #[must_use]
    pub fn entity_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.entity_idle_timeout_secs)
    }

    /// Poll interval for `wait_for_completion`.
    #[must_use]
    pub fn completion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms.max(1))
    }
}
