//! Common test utilities for server integration tests.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use nimbus_control::{DeploymentConfig, SimulatedPlatform};
use nimbus_durable::{EngineConfig, InstanceId, InstanceStatus};
use nimbus_server::config::{DemoSettings, ServerSettings};
use nimbus_server::{QueueConsumer, Runtime, ServerConfig};
use nimbus_state::{MemoryKv, MemoryQueue, StateProvider};
use tokio_util::sync::CancellationToken;

/// Upper bound for any single orchestration in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// A node over in-memory state and a simulated platform the test keeps a
/// handle on.
pub struct TestNode {
    pub config: ServerConfig,
    pub platform: SimulatedPlatform,
    pub queue: Arc<MemoryQueue>,
    pub kv: Arc<MemoryKv>,
    pub runtime: Runtime,
    pub cancel: CancellationToken,
}

impl TestNode {
    pub fn new(platform: SimulatedPlatform) -> Self {
        Self::with_kv(platform, Arc::new(MemoryKv::new()))
    }

    /// A node over an existing store, as after a restart.
    pub fn with_kv(platform: SimulatedPlatform, kv: Arc<MemoryKv>) -> Self {
        let config = test_config();
        let queue = Arc::new(MemoryQueue::new());
        let state = StateProvider::new()
            .with_kv(kv.clone())
            .with_queue(queue.clone());
        let cancel = CancellationToken::new();

        let runtime = Runtime::build(
            &config,
            &state,
            Arc::new(platform.clone()),
            cancel.child_token(),
        )
        .unwrap();

        Self {
            config,
            platform,
            queue,
            kv,
            runtime,
            cancel,
        }
    }

    pub fn consumer(&self) -> QueueConsumer {
        self.runtime.consumer(&self.config)
    }

    pub async fn finish(&self, instance_id: &InstanceId) -> InstanceStatus {
        self.runtime
            .engine
            .wait_for_completion(instance_id, WAIT)
            .await
            .unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Millisecond intervals everywhere.
fn test_config() -> ServerConfig {
    ServerConfig {
        server: ServerSettings {
            receive_poll_ms: 5,
            visibility_timeout_secs: 30,
            ..ServerSettings::default()
        },
        deployment: DeploymentConfig::fast(),
        engine: EngineConfig {
            completion_poll_ms: 5,
            ..EngineConfig::default()
        },
        demo: DemoSettings { job_delay_ms: 5 },
        ..ServerConfig::default()
    }
}
