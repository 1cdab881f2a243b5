//! Deployment lifecycle controller.

mod controller;
mod create_task;

pub use controller::DeploymentController;
