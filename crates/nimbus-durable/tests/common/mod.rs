//! Common test utilities for orchestration and entity integration tests.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use nimbus_durable::{
    EngineConfig, InstanceId, InstanceRecord, InstanceStatus, OrchestrationEngine,
};
use nimbus_state::{KvBackend, MemoryKv};
use parking_lot::Mutex;

/// Upper bound for any single orchestration in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// Activity inputs in the order the activities started.
#[derive(Clone, Default)]
pub struct Invocations(Arc<Mutex<Vec<String>>>);

impl Invocations {
    pub fn record(&self, input: impl Into<String>) {
        self.0.lock().push(input.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Engine over an in-memory store with the fixture programs registered.
pub struct TestEngine {
    pub kv: Arc<MemoryKv>,
    pub engine: OrchestrationEngine,
    pub invocations: Invocations,
}

impl TestEngine {
    pub fn new() -> Self {
        let kv = Arc::new(MemoryKv::new());
        let invocations = Invocations::default();
        let config = EngineConfig {
            completion_poll_ms: 5,
            ..EngineConfig::default()
        };
        let engine = OrchestrationEngine::new(
            kv.clone(),
            fixtures::registry(&invocations),
            config,
        );
        Self {
            kv,
            engine,
            invocations,
        }
    }

    /// Writes a record straight into the store, as a crashed driver would
    /// have left it.
    pub async fn seed(&self, record: &InstanceRecord) {
        let bytes = serde_json::to_vec(record).unwrap();
        self.kv
            .put(&record.instance_id.storage_key(), &bytes)
            .await
            .unwrap();
    }

    pub async fn finish(&self, instance_id: &InstanceId) -> InstanceStatus {
        self.engine
            .wait_for_completion(instance_id, WAIT)
            .await
            .unwrap()
    }
}
