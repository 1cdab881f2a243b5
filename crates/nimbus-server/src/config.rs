//! Server configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working single-node setup backed by in-memory state and a simulated
//! platform.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use nimbus_control::{DeploymentConfig, PlatformConfig};
use nimbus_durable::EngineConfig;
use nimbus_state::StateConfig;
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Listener and queue settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment controller polling and retry behaviour.
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Orchestration engine and entity tuning.
    #[serde(default)]
    pub engine: EngineConfig,

    /// State backends.
    #[serde(default)]
    pub state: StateConfig,

    /// Platform the controller deploys to.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Sample workflow settings.
    #[serde(default)]
    pub demo: DemoSettings,
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `nimbus.toml` in the current directory (if present)
    /// 3. Specified config file path (if provided)
    /// 4. Environment variables with `NIMBUS_` prefix, `__` between sections
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("nimbus.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        let config: Self = figment
            .merge(Env::prefixed("NIMBUS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the server spin or never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.queue.trim().is_empty() {
            return Err(ConfigError::Invalid("server.queue must not be empty".to_owned()));
        }
        if self.server.receive_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.receive_poll_ms must be at least 1".to_owned(),
            ));
        }
        self.deployment
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("deployment: {e}")))?;
        if self.engine.entity_mailbox_depth == 0 {
            return Err(ConfigError::Invalid(
                "engine.entity_mailbox_depth must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Listener and queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// TCP address of the HTTP API.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Queue deployment requests are consumed from.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Pause between receive attempts on an empty queue (milliseconds).
    #[serde(default = "default_receive_poll_ms")]
    pub receive_poll_ms: u64,

    /// How long a received message stays hidden before redelivery (seconds).
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            queue: default_queue(),
            receive_poll_ms: default_receive_poll_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl ServerSettings {
    #[must_use]
    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

const fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7071)
}

fn default_queue() -> String {
    "deployimage".to_owned()
}

const fn default_receive_poll_ms() -> u64 {
    500
}

const fn default_visibility_timeout_secs() -> u64 {
    300
}

/// Settings for the sample orchestrations.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoSettings {
    /// How long `execute_job` pretends to work (milliseconds).
    #[serde(default = "default_job_delay_ms")]
    pub job_delay_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            job_delay_ms: default_job_delay_ms(),
        }
    }
}

impl DemoSettings {
    #[must_use]
    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }
}

const fn default_job_delay_ms() -> u64 {
    5_000
}
