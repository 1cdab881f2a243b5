//! Durable substrate for the nimbus runtime.
//!
//! Orchestration histories and entity state are persisted through
//! [`KvBackend`]; inbound deployment requests arrive through
//! [`QueueBackend`]. The in-memory backends are enabled by default and are
//! what single-node deployments and the test suites run against.

#![forbid(unsafe_code)]

mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "config")]
mod config;

#[cfg(feature = "config")]
mod provider;

pub use error::{KvError, QueueError, StateError};
pub use traits::{KvBackend, QueueBackend};
pub use types::{Message, MessageId};

#[cfg(feature = "memory")]
pub use memory::{MemoryKv, MemoryQueue};

#[cfg(feature = "config")]
pub use config::{KvConfig, QueueConfig, StateConfig};

#[cfg(feature = "config")]
pub use provider::StateProvider;
