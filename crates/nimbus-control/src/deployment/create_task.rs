//! Background create call tracked alongside the polling loops.

use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::platform::ResourceClient;
use crate::types::{ContainerGroup, ContainerGroupSpec};

enum CreateState {
    NotIssued,
    InFlight(JoinHandle<ControlResult<ContainerGroup>>),
    Finished(ControlResult<()>),
}

/// Handle to a create call running on its own task.
///
/// The poller checks it without blocking on every iteration; the first
/// observed failure is handed out exactly once. Dropping the handle before
/// [`CreateTask::join`] aborts the task.
pub(crate) struct CreateTask {
    container_group: String,
    state: CreateState,
}

impl CreateTask {
    /// No create was needed because the group was already running.
    pub(crate) fn not_issued(container_group: &str) -> Self {
        Self {
            container_group: container_group.to_owned(),
            state: CreateState::NotIssued,
        }
    }

    pub(crate) fn spawn(client: Arc<dyn ResourceClient>, spec: ContainerGroupSpec) -> Self {
        let container_group = spec.name.clone();
        let handle = tokio::spawn(async move { client.create(&spec).await });
        Self {
            container_group,
            state: CreateState::InFlight(handle),
        }
    }

    /// Returns the creation error if the task has already failed.
    pub(crate) fn take_failure(&mut self) -> Option<ControlError> {
        if let CreateState::InFlight(handle) = &mut self.state {
            if !handle.is_finished() {
                return None;
            }
            // A finished handle resolves on first poll.
            let result = handle.now_or_never()?;
            self.state = CreateState::Finished(self.settle(result));
        }

        match std::mem::replace(&mut self.state, CreateState::Finished(Ok(()))) {
            CreateState::Finished(Err(err)) => Some(err),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Wait for the create call and report its outcome.
    pub(crate) async fn join(mut self) -> ControlResult<()> {
        match std::mem::replace(&mut self.state, CreateState::NotIssued) {
            CreateState::NotIssued => Ok(()),
            CreateState::Finished(result) => result,
            CreateState::InFlight(handle) => {
                debug!(container_group = %self.container_group, "waiting for create call");
                let result = handle.await;
                self.settle(result)
            }
        }
    }

    fn settle(
        &self,
        result: Result<ControlResult<ContainerGroup>, tokio::task::JoinError>,
    ) -> ControlResult<()> {
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(ControlError::CreationFailure {
                container_group: self.container_group.clone(),
                source: Box::new(source),
            }),
            Err(e) => Err(ControlError::internal(format!("create task failed: {e}"))),
        }
    }
}

impl Drop for CreateTask {
    fn drop(&mut self) {
        if let CreateState::InFlight(handle) = &self.state {
            handle.abort();
        }
    }
}
