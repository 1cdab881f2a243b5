//! Configuration for nimbus-control.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::platform::SimulatedPlatformConfig;

/// Polling and retry behaviour of the deployment controller.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Interval between checks while waiting for the group to materialise (milliseconds).
    #[serde(default = "default_materialise_poll_ms")]
    pub materialise_poll_ms: u64,

    /// Interval between refreshes while the workload is pending or running (seconds).
    #[serde(default = "default_running_poll_secs")]
    pub running_poll_secs: u64,

    /// Maximum log retrieval attempts.
    #[serde(default = "default_log_retry_attempts")]
    pub log_retry_attempts: u32,

    /// Delay between log retrieval attempts (milliseconds).
    #[serde(default = "default_log_retry_interval_ms")]
    pub log_retry_interval_ms: u64,

    /// Overall deadline for a single deployment (seconds). `0` waits forever.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: Option<u64>,

    /// Overrides `running_poll_secs` with a millisecond interval when set.
    #[serde(default)]
    pub running_poll_ms: Option<u64>,
}

const fn default_materialise_poll_ms() -> u64 {
    1_000
}

const fn default_running_poll_secs() -> u64 {
    15
}

const fn default_log_retry_attempts() -> u32 {
    100
}

const fn default_log_retry_interval_ms() -> u64 {
    1_000
}

#[allow(clippy::unnecessary_wraps)]
const fn default_deadline_secs() -> Option<u64> {
    Some(3_600) // 1 hour
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            materialise_poll_ms: default_materialise_poll_ms(),
            running_poll_secs: default_running_poll_secs(),
            log_retry_attempts: default_log_retry_attempts(),
            log_retry_interval_ms: default_log_retry_interval_ms(),
            deadline_secs: default_deadline_secs(),
            running_poll_ms: None,
        }
    }
}

impl DeploymentConfig {
    /// Millisecond-scale intervals for tests and local runs.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            materialise_poll_ms: 5,
            running_poll_secs: 0,
            log_retry_attempts: 5,
            log_retry_interval_ms: 5,
            deadline_secs: Some(30),
            running_poll_ms: Some(5),
        }
    }

    /// Interval for the materialisation loop.
    #[must_use]
    pub fn materialise_interval(&self) -> Duration {
        Duration::from_millis(self.materialise_poll_ms)
    }

    /// Interval for the running-wait loop.
    #[must_use]
    pub fn running_interval(&self) -> Duration {
        self.running_poll_ms.map_or_else(
            || Duration::from_secs(self.running_poll_secs),
            Duration::from_millis,
        )
    }

    /// Delay between log retrieval attempts.
    #[must_use]
    pub fn log_retry_interval(&self) -> Duration {
        Duration::from_millis(self.log_retry_interval_ms)
    }

    /// Overall deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Reject intervals that would busy-poll the platform and a log budget
    /// that could never succeed.
    pub fn validate(&self) -> ControlResult<()> {
        if self.materialise_poll_ms == 0 {
            return Err(ControlError::Config(
                "materialise_poll_ms must be at least 1".to_owned(),
            ));
        }
        if self.running_interval().is_zero() {
            return Err(ControlError::Config(
                "running poll interval must not be zero".to_owned(),
            ));
        }
        if self.log_retry_attempts == 0 {
            return Err(ControlError::Config(
                "log_retry_attempts must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Which platform backend resource clients are created from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformConfig {
    /// In-process simulated platform.
    Simulated(SimulatedPlatformConfig),
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::Simulated(SimulatedPlatformConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ResourceGroupState;

    #[test]
    fn default_config_matches_platform_cadence() {
        let config = DeploymentConfig::default();
        assert_eq!(config.materialise_interval(), Duration::from_secs(1));
        assert_eq!(config.running_interval(), Duration::from_secs(15));
        assert_eq!(config.log_retry_attempts, 100);
        assert_eq!(config.log_retry_interval(), Duration::from_secs(1));
        assert_eq!(config.deadline(), Some(Duration::from_secs(3_600)));
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            materialise_poll_ms = 250
            running_poll_secs = 5
            log_retry_attempts = 10
            deadline_secs = 600
        "#;

        let config: DeploymentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.materialise_interval(), Duration::from_millis(250));
        assert_eq!(config.running_interval(), Duration::from_secs(5));
        assert_eq!(config.log_retry_attempts, 10);
        assert_eq!(config.log_retry_interval_ms, 1_000);
        assert_eq!(config.deadline(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_deadline_disables_it() {
        let config: DeploymentConfig = toml::from_str("deadline_secs = 0").unwrap();
        assert_eq!(config.deadline(), None);
    }

    #[test]
    fn busy_polling_is_rejected() {
        assert!(DeploymentConfig::default().validate().is_ok());
        assert!(DeploymentConfig::fast().validate().is_ok());

        let config: DeploymentConfig = toml::from_str("running_poll_secs = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
        assert!(err.to_string().contains("running poll interval"));

        let config: DeploymentConfig = toml::from_str("log_retry_attempts = 0").unwrap();
        assert!(matches!(config.validate(), Err(ControlError::Config(_))));
    }

    #[test]
    fn millisecond_override_wins() {
        let config: DeploymentConfig = toml::from_str("running_poll_ms = 20").unwrap();
        assert_eq!(config.running_interval(), Duration::from_millis(20));
    }

    #[test]
    fn platform_config_from_toml() {
        let toml = r#"
            kind = "simulated"
            lifecycle = ["Pending", "Running", "Failed"]
            logs = "boom"
        "#;

        let PlatformConfig::Simulated(sim) = toml::from_str(toml).unwrap();
        assert_eq!(
            sim.lifecycle,
            vec![
                ResourceGroupState::Pending,
                ResourceGroupState::Running,
                ResourceGroupState::Failed
            ]
        );
        assert_eq!(sim.logs, "boom");
    }
}
