//! Platform-facing types shared by the controller and resource clients.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Detail status a container reports when its process exited abnormally.
pub const DETAIL_STATUS_ERROR: &str = "Error";

/// Lifecycle state of a container group as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceGroupState {
    /// The group does not exist.
    Absent,
    /// Created but not yet running.
    Pending,
    /// Containers are running.
    Running,
    /// All containers exited successfully.
    Succeeded,
    /// Stopped by an operator.
    Stopped,
    /// The group failed.
    Failed,
}

impl ResourceGroupState {
    /// Get the platform's name for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        }
    }

    /// The group is still doing work and should be polled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// The group ran to completion at some point and needs an explicit start
    /// to run again.
    #[must_use]
    pub const fn needs_restart(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Stopped)
    }
}

impl fmt::Display for ResourceGroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceGroupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Absent" => Ok(Self::Absent),
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Stopped" => Ok(Self::Stopped),
            "Failed" => Ok(Self::Failed),
            _ => Err(format!("unknown resource group state: {s}")),
        }
    }
}

/// Per-container view inside a group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,
    /// Platform detail status of the current instance, e.g. `Completed` or `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_status: Option<String>,
}

/// Point-in-time snapshot of a container group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerGroup {
    /// Owning resource group.
    pub resource_group: String,
    /// Group name.
    pub name: String,
    /// Reported state. `None` while the platform is still transitioning.
    pub state: Option<ResourceGroupState>,
    /// Containers in the group.
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
}

impl ContainerGroup {
    /// Look up a container by name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Whether the controller should keep polling this group.
    ///
    /// A null state counts as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.map_or(true, |s| s.is_active())
    }

    /// Whether this snapshot describes a failed workload.
    #[must_use]
    pub fn has_failed(&self, container: &str) -> bool {
        let errored = self
            .container(container)
            .and_then(|c| c.detail_status.as_deref())
            == Some(DETAIL_STATUS_ERROR);
        errored || self.state == Some(ResourceGroupState::Failed)
    }

    /// State label for log output.
    #[must_use]
    pub fn state_label(&self) -> &'static str {
        self.state.map_or("null", |s| s.as_str())
    }
}

/// OS type for the container group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    /// Linux containers.
    #[default]
    Linux,
}

/// Restart behaviour of a container group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Containers run once.
    #[default]
    Never,
    /// Restart only on failure.
    OnFailure,
    /// Always restart.
    Always,
}

/// Definition submitted to the platform's create call.
///
/// A single container named after the group, running the requested image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerGroupSpec {
    /// Owning resource group.
    pub resource_group: String,
    /// Group name, also used as the container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Private registry server.
    pub registry_server: String,
    /// Registry user.
    pub registry_username: String,
    /// Internal TCP port exposed by the container.
    pub port: u16,
    /// CPU cores.
    pub cpu_cores: u32,
    /// Memory in GB.
    pub memory_gb: u32,
    /// Environment passed to the container.
    pub environment: BTreeMap<String, String>,
    /// OS type.
    pub os_type: OsType,
    /// Restart policy.
    pub restart_policy: RestartPolicy,
}

/// Result of a successful deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    /// Caller-supplied correlation id.
    pub transaction_id: String,
    /// Target container group.
    pub container_group: String,
    /// Final observed state.
    pub state: ResourceGroupState,
    /// Container log output.
    pub logs: String,
}

/// Controller phase, used in structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Looking for an existing group and issuing the create.
    Reconciling,
    /// Waiting for the group to report a state.
    Materialising,
    /// Issuing an explicit start on a finished group.
    Restarting,
    /// Waiting for the workload to leave `Pending`/`Running`.
    AwaitingCompletion,
    /// Fetching container logs.
    DrainingLogs,
    /// Joining the create call and deciding the outcome.
    Classifying,
}

impl Phase {
    /// Get the phase name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reconciling => "reconciling",
            Self::Materialising => "materialising",
            Self::Restarting => "restarting",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::DrainingLogs => "draining_logs",
            Self::Classifying => "classifying",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn group(state: Option<ResourceGroupState>, detail: Option<&str>) -> ContainerGroup {
        ContainerGroup {
            resource_group: "rg".to_owned(),
            name: "g1".to_owned(),
            state,
            containers: vec![ContainerStatus {
                name: "g1".to_owned(),
                detail_status: detail.map(str::to_owned),
            }],
        }
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            ResourceGroupState::Absent,
            ResourceGroupState::Pending,
            ResourceGroupState::Running,
            ResourceGroupState::Succeeded,
            ResourceGroupState::Stopped,
            ResourceGroupState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<ResourceGroupState>().unwrap(), state);
        }
        assert!("Deleting".parse::<ResourceGroupState>().is_err());
    }

    #[test]
    fn null_state_is_still_active() {
        assert!(group(None, None).is_active());
        assert!(group(Some(ResourceGroupState::Pending), None).is_active());
        assert!(!group(Some(ResourceGroupState::Succeeded), None).is_active());
        assert_eq!(group(None, None).state_label(), "null");
    }

    #[test]
    fn failure_from_state_or_detail_status() {
        assert!(group(Some(ResourceGroupState::Failed), None).has_failed("g1"));
        assert!(group(Some(ResourceGroupState::Succeeded), Some("Error")).has_failed("g1"));
        assert!(!group(Some(ResourceGroupState::Succeeded), Some("Completed")).has_failed("g1"));
        assert!(!group(Some(ResourceGroupState::Succeeded), Some("Error")).has_failed("other"));
    }

    #[test]
    fn restart_only_for_finished_states() {
        assert!(ResourceGroupState::Succeeded.needs_restart());
        assert!(ResourceGroupState::Stopped.needs_restart());
        assert!(!ResourceGroupState::Failed.needs_restart());
        assert!(!ResourceGroupState::Running.needs_restart());
    }
}
