//! Durable orchestrations and entities for nimbus.
//!
//! An [`OrchestrationEngine`] runs registered programs as replayable
//! instances. A program only touches the outside world through its
//! [`OrchestrationContext`]: every activity call becomes a numbered step in
//! the instance's history, and re-running the program against that history
//! reproduces the same decisions without repeating finished work.
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .activity_fn("execute_job", |_ctx, input| async move {
//!         Ok(json!(format!("Hello {}!", input.as_str().unwrap_or_default())))
//!     })
//!     .orchestration_fn("fan_out", |ctx, _input| async move {
//!         let jobs = ["Frankfurt", "Seattle", "Sarajevo"]
//!             .map(|city| ctx.call_activity::<_, String>("execute_job", city));
//!         let outputs = futures::future::try_join_all(jobs).await?;
//!         Ok(json!(outputs))
//!     })
//!     .build();
//!
//! let engine = OrchestrationEngine::new(kv, registry, EngineConfig::default());
//! let id = engine.start("fan_out", Value::Null).await?;
//! let status = engine.wait_for_completion(&id, Duration::from_secs(30)).await?;
//! ```
//!
//! [`EntityHost`] provides the other durable primitive: per-key,
//! single-writer state such as the [`Counter`] entity.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod engine;
pub mod entity;
pub mod error;
pub mod history;
pub mod registry;

pub use config::EngineConfig;
pub use context::OrchestrationContext;
pub use engine::OrchestrationEngine;
pub use entity::{Counter, CounterOperation, Effect, Entity, EntityHost, StateChange};
pub use error::{ActivityError, EngineError, EngineResult, EntityError, OrchestrationError};
pub use history::{HistoryEvent, InstanceId, InstanceRecord, InstanceStatus, RuntimeStatus};
pub use registry::{
    Activity, ActivityContext, FnActivity, FnOrchestration, Orchestration, Registry,
    RegistryBuilder,
};
