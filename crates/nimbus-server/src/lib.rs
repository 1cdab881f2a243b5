//! Nimbus server.
//!
//! The dispatcher boundary of nimbus: a queue consumer and an HTTP API that
//! start durable orchestrations, plus the workflows those orchestrations run.
//!
//! # Architecture
//!
//! ```text
//! queue "deployimage" ──► QueueConsumer ─┐
//!                                        ├─► Dispatcher ──► OrchestrationEngine
//! POST /deployments ─────────────────────┘                      │
//!                                                  deploy_image activity
//!                                                               │
//!                                                    DeploymentController
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from `nimbus.toml` in the current directory,
//! with environment variable overrides using the `NIMBUS_` prefix.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:7071"
//! queue = "deployimage"
//!
//! [deployment]
//! running_poll_secs = 15
//! deadline_secs = 3600
//!
//! [platform]
//! kind = "simulated"
//! logs = "hello from the simulator"
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod services;
pub mod workflows;

pub use config::ServerConfig;
pub use dispatcher::{Delivery, DispatchError, Dispatcher, QueueConsumer};
pub use services::{Runtime, Services};
