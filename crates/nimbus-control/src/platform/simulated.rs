//! In-process stand-in for the remote platform.
//!
//! Each group follows a scripted lifecycle. Every observation (`get_by_name`
//! or `refresh`) advances the script by one step before reporting, so a
//! lifecycle of `[Absent, Pending, Running, Succeeded]` is seen by a poller
//! as "not there yet", then pending, running and finally succeeded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::{ResourceClient, ResourceProvider};
use crate::error::{ControlError, ControlResult};
use crate::request::PlatformCredentials;
use crate::types::{ContainerGroup, ContainerGroupSpec, ContainerStatus, ResourceGroupState};

/// Scripted behaviour of a [`SimulatedPlatform`].
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedPlatformConfig {
    /// States a newly created group moves through.
    #[serde(default = "default_lifecycle")]
    pub lifecycle: Vec<ResourceGroupState>,

    /// States a group moves through after an explicit start.
    #[serde(default = "default_lifecycle")]
    pub restart_lifecycle: Vec<ResourceGroupState>,

    /// Observations reporting a null state right after creation.
    #[serde(default)]
    pub transitional_observations: u32,

    /// Log output of every container.
    #[serde(default)]
    pub logs: String,

    /// Log calls that fail with `LogsUnavailable` before logs appear.
    #[serde(default)]
    pub log_failures: u32,

    /// Detail status reported once a group reaches a terminal state.
    #[serde(default)]
    pub detail_status: Option<String>,

    /// Make every create call fail with this message.
    #[serde(default)]
    pub create_failure: Option<String>,

    /// Latency of the create call (milliseconds).
    #[serde(default)]
    pub create_delay_ms: u64,

    /// Reject credentials whose client id differs.
    #[serde(default)]
    pub required_client_id: Option<String>,
}

fn default_lifecycle() -> Vec<ResourceGroupState> {
    vec![
        ResourceGroupState::Pending,
        ResourceGroupState::Running,
        ResourceGroupState::Succeeded,
    ]
}

impl Default for SimulatedPlatformConfig {
    fn default() -> Self {
        Self {
            lifecycle: default_lifecycle(),
            restart_lifecycle: default_lifecycle(),
            transitional_observations: 0,
            logs: String::new(),
            log_failures: 0,
            detail_status: None,
            create_failure: None,
            create_delay_ms: 0,
            required_client_id: None,
        }
    }
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Clients handed out by the provider.
    pub connect: u32,
    /// Group lookups.
    pub get_by_name: u32,
    /// Create calls.
    pub create: u32,
    /// Restarts of an existing group.
    pub start: u32,
    /// State refreshes.
    pub refresh: u32,
    /// Log retrievals, including failed ones.
    pub get_logs: u32,
}

#[derive(Debug)]
struct SimGroup {
    state: Option<ResourceGroupState>,
    script: VecDeque<Option<ResourceGroupState>>,
}

#[derive(Debug, Default)]
struct Inner {
    config: SimulatedPlatformConfig,
    groups: HashMap<(String, String), SimGroup>,
    log_failures_left: u32,
    calls: CallCounts,
    log_states: Vec<Option<ResourceGroupState>>,
}

impl Inner {
    fn observe(&mut self, resource_group: &str, name: &str) -> Option<ContainerGroup> {
        let key = (resource_group.to_owned(), name.to_owned());
        let group = self.groups.get_mut(&key)?;

        if let Some(next) = group.script.pop_front() {
            group.state = next;
        }

        let state = group.state;
        self.snapshot(resource_group, name, state)
    }

    fn snapshot(
        &self,
        resource_group: &str,
        name: &str,
        state: Option<ResourceGroupState>,
    ) -> Option<ContainerGroup> {
        if state == Some(ResourceGroupState::Absent) {
            return None;
        }

        let detail_status = match state {
            Some(ResourceGroupState::Running) => Some("Running".to_owned()),
            Some(ResourceGroupState::Succeeded) => Some(
                self.config
                    .detail_status
                    .clone()
                    .unwrap_or_else(|| "Completed".to_owned()),
            ),
            Some(ResourceGroupState::Failed) => Some(
                self.config
                    .detail_status
                    .clone()
                    .unwrap_or_else(|| "Error".to_owned()),
            ),
            Some(ResourceGroupState::Stopped) => Some("Terminated".to_owned()),
            _ => None,
        };

        Some(ContainerGroup {
            resource_group: resource_group.to_owned(),
            name: name.to_owned(),
            state,
            containers: vec![ContainerStatus {
                name: name.to_owned(),
                detail_status,
            }],
        })
    }

    fn current_state(&self, resource_group: &str, name: &str) -> Option<ResourceGroupState> {
        self.groups
            .get(&(resource_group.to_owned(), name.to_owned()))
            .and_then(|g| g.state)
    }
}

/// Scripted in-memory platform, usable as both provider and client.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the controller drives another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlatform {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&SimulatedPlatformConfig::default())
    }

    #[must_use]
    pub fn from_config(config: &SimulatedPlatformConfig) -> Self {
        let inner = Inner {
            config: config.clone(),
            log_failures_left: config.log_failures,
            ..Inner::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Seed a group that already exists in `state`.
    #[must_use]
    pub fn with_existing(
        self,
        resource_group: &str,
        name: &str,
        state: ResourceGroupState,
    ) -> Self {
        self.inner.lock().groups.insert(
            (resource_group.to_owned(), name.to_owned()),
            SimGroup {
                state: Some(state),
                script: VecDeque::new(),
            },
        );
        self
    }

    #[must_use]
    pub fn with_lifecycle(self, states: impl IntoIterator<Item = ResourceGroupState>) -> Self {
        self.inner.lock().config.lifecycle = states.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_restart_lifecycle(
        self,
        states: impl IntoIterator<Item = ResourceGroupState>,
    ) -> Self {
        self.inner.lock().config.restart_lifecycle = states.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_transitional_observations(self, count: u32) -> Self {
        self.inner.lock().config.transitional_observations = count;
        self
    }

    #[must_use]
    pub fn with_logs(self, logs: impl Into<String>) -> Self {
        self.inner.lock().config.logs = logs.into();
        self
    }

    #[must_use]
    pub fn with_log_failures(self, count: u32) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.config.log_failures = count;
            inner.log_failures_left = count;
        }
        self
    }

    #[must_use]
    pub fn with_detail_status(self, status: impl Into<String>) -> Self {
        self.inner.lock().config.detail_status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_create_failure(self, message: impl Into<String>) -> Self {
        self.inner.lock().config.create_failure = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.inner.lock().config.create_delay_ms =
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_required_client_id(self, client_id: impl Into<String>) -> Self {
        self.inner.lock().config.required_client_id = Some(client_id.into());
        self
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls.clone()
    }

    /// Group state at the time of each `get_logs` call.
    #[must_use]
    pub fn log_states(&self) -> Vec<Option<ResourceGroupState>> {
        self.inner.lock().log_states.clone()
    }

    /// Current state of a group without advancing its script.
    #[must_use]
    pub fn state_of(&self, resource_group: &str, name: &str) -> Option<ResourceGroupState> {
        self.inner.lock().current_state(resource_group, name)
    }
}

#[async_trait]
impl ResourceClient for SimulatedPlatform {
    async fn get_by_name(
        &self,
        resource_group: &str,
        name: &str,
    ) -> ControlResult<Option<ContainerGroup>> {
        let mut inner = self.inner.lock();
        inner.calls.get_by_name += 1;
        Ok(inner.observe(resource_group, name))
    }

    async fn create(&self, spec: &ContainerGroupSpec) -> ControlResult<ContainerGroup> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.calls.create += 1;
            Duration::from_millis(inner.config.create_delay_ms)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(message) = inner.config.create_failure.clone() {
            return Err(ControlError::platform(message));
        }

        let key = (spec.resource_group.clone(), spec.name.clone());
        if let Some(existing) = inner.groups.get(&key) {
            debug!(container_group = %spec.name, "create on existing group is a no-op");
            let state = existing.state;
            return inner
                .snapshot(&spec.resource_group, &spec.name, state)
                .ok_or_else(|| ControlError::ContainerGroupNotFound(spec.name.clone()));
        }

        let transitional = inner.config.transitional_observations as usize;
        let script: VecDeque<_> = std::iter::repeat(None)
            .take(transitional)
            .chain(inner.config.lifecycle.iter().copied().map(Some))
            .collect();

        inner.groups.insert(
            key,
            SimGroup {
                state: None,
                script,
            },
        );

        Ok(ContainerGroup {
            resource_group: spec.resource_group.clone(),
            name: spec.name.clone(),
            state: None,
            containers: vec![ContainerStatus {
                name: spec.name.clone(),
                detail_status: None,
            }],
        })
    }

    async fn start(&self, resource_group: &str, name: &str) -> ControlResult<()> {
        let mut inner = self.inner.lock();
        inner.calls.start += 1;

        let restart: VecDeque<_> = inner
            .config
            .restart_lifecycle
            .iter()
            .copied()
            .map(Some)
            .collect();

        let group = inner
            .groups
            .get_mut(&(resource_group.to_owned(), name.to_owned()))
            .ok_or_else(|| ControlError::ContainerGroupNotFound(name.to_owned()))?;
        group.script = restart;
        Ok(())
    }

    async fn refresh(&self, resource_group: &str, name: &str) -> ControlResult<ContainerGroup> {
        let mut inner = self.inner.lock();
        inner.calls.refresh += 1;
        inner
            .observe(resource_group, name)
            .ok_or_else(|| ControlError::ContainerGroupNotFound(name.to_owned()))
    }

    async fn get_logs(
        &self,
        resource_group: &str,
        name: &str,
        container: &str,
    ) -> ControlResult<String> {
        let mut inner = self.inner.lock();
        inner.calls.get_logs += 1;

        let state = inner.current_state(resource_group, name);
        inner.log_states.push(state);

        if !inner
            .groups
            .contains_key(&(resource_group.to_owned(), name.to_owned()))
        {
            return Err(ControlError::ContainerGroupNotFound(name.to_owned()));
        }

        if inner.log_failures_left > 0 {
            inner.log_failures_left -= 1;
            return Err(ControlError::LogsUnavailable(format!(
                "logs for container {container} are not available yet"
            )));
        }

        Ok(inner.config.logs.clone())
    }
}

#[async_trait]
impl ResourceProvider for SimulatedPlatform {
    async fn connect(
        &self,
        credentials: &PlatformCredentials,
    ) -> ControlResult<Arc<dyn ResourceClient>> {
        let mut inner = self.inner.lock();
        inner.calls.connect += 1;

        if let Some(required) = &inner.config.required_client_id {
            if *required != credentials.client_id {
                return Err(ControlError::Unauthorized(format!(
                    "client {} is not authorised",
                    credentials.client_id
                )));
            }
        }

        Ok(Arc::new(self.clone()))
    }
}
