//! Nimbus deployment controller.
//!
//! Drives a single containerised workload on a remote compute platform from
//! a [`DeploymentRequest`] to a terminal outcome. The controller never talks
//! to the platform directly; everything goes through the [`ResourceClient`]
//! capability handed out by a [`ResourceProvider`] for the request's
//! credentials.
//!
//! # Phases
//!
//! ```text
//! Reconciling ──▶ Materialising ──▶ Restarting ──▶ AwaitingCompletion ──▶ DrainingLogs ──▶ Classifying
//!      │                │                               │
//!      └── create ──────┴─────── creation error ────────┴──▶ CreationFailure
//! ```
//!
//! `Restarting` is only entered when the group was found in a finished
//! state (`Succeeded` or `Stopped`). Creation runs as a background task
//! alongside the polling loops and is joined before a result is returned.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nimbus_control::{DeploymentConfig, DeploymentController, DeploymentRequest, SimulatedPlatform};
//!
//! let platform = SimulatedPlatform::new().with_logs("done");
//! let controller = DeploymentController::new(Arc::new(platform), DeploymentConfig::default());
//!
//! let request = DeploymentRequest::from_message(payload)?;
//! let outcome = controller.deploy(&request).await?;
//! println!("{} finished as {}", outcome.container_group, outcome.state);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod deployment;
pub mod error;
pub mod platform;
pub mod request;
pub mod types;

pub use config::{DeploymentConfig, PlatformConfig};
pub use deployment::DeploymentController;
pub use error::{ControlError, ControlResult};
pub use platform::{create_provider, ResourceClient, ResourceProvider, SimulatedPlatform};
pub use request::{DeploymentMessage, DeploymentRequest, PlatformCredentials, RegistryCredentials, Secret};
pub use types::{
    ContainerGroup, ContainerGroupSpec, ContainerStatus, DeploymentOutcome, Phase,
    ResourceGroupState,
};
