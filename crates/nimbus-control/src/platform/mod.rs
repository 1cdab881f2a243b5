//! Capability boundary to the remote compute platform.
//!
//! [`ResourceClient`] is the full set of operations the controller may
//! perform against the platform. Clients are obtained per request from a
//! [`ResourceProvider`], which authenticates the request's credentials.

mod simulated;

pub use simulated::{CallCounts, SimulatedPlatform, SimulatedPlatformConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PlatformConfig;
use crate::error::ControlResult;
use crate::request::PlatformCredentials;
use crate::types::{ContainerGroup, ContainerGroupSpec};

/// Operations on container groups.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Look up a group. `Ok(None)` when it does not exist.
    async fn get_by_name(
        &self,
        resource_group: &str,
        name: &str,
    ) -> ControlResult<Option<ContainerGroup>>;

    /// Create a group, or update it in place if it already exists.
    ///
    /// May not return until the platform has accepted the definition, which
    /// can take minutes.
    async fn create(&self, spec: &ContainerGroupSpec) -> ControlResult<ContainerGroup>;

    /// Start a group that has finished or been stopped.
    async fn start(&self, resource_group: &str, name: &str) -> ControlResult<()>;

    /// Fetch a fresh snapshot of an existing group.
    async fn refresh(&self, resource_group: &str, name: &str) -> ControlResult<ContainerGroup>;

    /// Fetch a container's log output.
    ///
    /// Fails with [`ControlError::LogsUnavailable`](crate::ControlError::LogsUnavailable)
    /// for a while after a short-lived container exits.
    async fn get_logs(
        &self,
        resource_group: &str,
        name: &str,
        container: &str,
    ) -> ControlResult<String>;
}

/// Hands out authenticated clients.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Authenticate and return a client scoped to the credentials.
    async fn connect(
        &self,
        credentials: &PlatformCredentials,
    ) -> ControlResult<Arc<dyn ResourceClient>>;
}

/// Create a resource provider from configuration.
#[must_use]
pub fn create_provider(config: &PlatformConfig) -> Arc<dyn ResourceProvider> {
    match config {
        PlatformConfig::Simulated(sim) => Arc::new(SimulatedPlatform::from_config(sim)),
    }
}
