use std::sync::Arc;

use crate::config::{KvConfig, QueueConfig, StateConfig};
use crate::error::StateError;
use crate::traits::{KvBackend, QueueBackend};

#[cfg(feature = "memory")]
use crate::memory::{MemoryKv, MemoryQueue};

/// Resolved state backends, shared by every service in the process.
#[derive(Clone, Default)]
pub struct StateProvider {
    kv: Option<Arc<dyn KvBackend>>,
    queue: Option<Arc<dyn QueueBackend>>,
}

impl StateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StateConfig) -> Result<Self, StateError> {
        let kv = config.kv.as_ref().map(Self::create_kv_backend).transpose()?;
        let queue = config
            .queue
            .as_ref()
            .map(Self::create_queue_backend)
            .transpose()?;

        Ok(Self { kv, queue })
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvBackend>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn QueueBackend>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn kv(&self) -> Result<Arc<dyn KvBackend>, StateError> {
        self.kv.clone().ok_or(StateError::NotConfigured("kv"))
    }

    pub fn queue(&self) -> Result<Arc<dyn QueueBackend>, StateError> {
        self.queue.clone().ok_or(StateError::NotConfigured("queue"))
    }

    fn create_kv_backend(config: &KvConfig) -> Result<Arc<dyn KvBackend>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            KvConfig::Memory => Ok(Arc::new(MemoryKv::new())),

            #[allow(unreachable_patterns)]
            other => Err(StateError::UnsupportedBackend(format!("{other:?}"))),
        }
    }

    fn create_queue_backend(config: &QueueConfig) -> Result<Arc<dyn QueueBackend>, StateError> {
        match config {
            #[cfg(feature = "memory")]
            QueueConfig::Memory => Ok(Arc::new(MemoryQueue::new())),

            #[allow(unreachable_patterns)]
            other => Err(StateError::UnsupportedBackend(format!("{other:?}"))),
        }
    }
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("kv", &self.kv.is_some())
            .field("queue", &self.queue.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn provider_without_backends() {
        let config = StateConfig {
            kv: None,
            queue: None,
        };
        let provider = StateProvider::from_config(&config).unwrap();

        assert!(matches!(provider.kv(), Err(StateError::NotConfigured("kv"))));
        assert!(provider.queue().is_err());
    }

    #[cfg(feature = "memory")]
    #[test]
    fn provider_from_default_config() {
        let provider = StateProvider::from_config(&StateConfig::default()).unwrap();

        assert!(provider.kv().is_ok());
        assert!(provider.queue().is_ok());
    }

    #[cfg(feature = "memory")]
    #[test]
    fn provider_builder_shares_backends() {
        let kv = Arc::new(MemoryKv::new());
        let provider = StateProvider::new()
            .with_kv(kv.clone())
            .with_queue(Arc::new(MemoryQueue::new()));

        assert!(provider.kv().is_ok());
        assert!(provider.queue().is_ok());
        assert_eq!(Arc::strong_count(&kv), 2);
    }
}
