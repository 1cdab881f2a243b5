//! Common test utilities for deployment controller integration tests.

pub mod fixtures;

use std::sync::Arc;

use nimbus_control::{DeploymentConfig, DeploymentController, SimulatedPlatform};

/// Controller wired to a simulated platform the test keeps a handle on.
pub struct TestDeployment {
    pub platform: SimulatedPlatform,
    pub controller: DeploymentController,
}

impl TestDeployment {
    /// Creates a controller with millisecond polling over `platform`.
    pub fn new(platform: SimulatedPlatform) -> Self {
        Self::with_config(platform, DeploymentConfig::fast())
    }

    /// Creates a controller with custom configuration.
    pub fn with_config(platform: SimulatedPlatform, config: DeploymentConfig) -> Self {
        let controller = DeploymentController::new(Arc::new(platform.clone()), config);
        Self {
            platform,
            controller,
        }
    }
}
