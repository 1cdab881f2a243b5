//! Drives one deployment request to a terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::create_task::CreateTask;
use crate::config::DeploymentConfig;
use crate::error::{ControlError, ControlResult};
use crate::platform::{ResourceClient, ResourceProvider};
use crate::request::DeploymentRequest;
use crate::types::{ContainerGroup, DeploymentOutcome, Phase, ResourceGroupState};

/// Orchestrates the create/poll/restart/logs lifecycle of a container group.
///
/// The controller keeps no state between calls; every [`deploy`] run
/// connects afresh with the request's credentials.
///
/// [`deploy`]: DeploymentController::deploy
pub struct DeploymentController {
    provider: Arc<dyn ResourceProvider>,
    config: DeploymentConfig,
    cancel: CancellationToken,
}

impl DeploymentController {
    /// Create a new controller.
    pub fn new(provider: Arc<dyn ResourceProvider>, config: DeploymentConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-progress waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Deploy the request's image and wait for the workload to finish.
    ///
    /// This runs the full lifecycle:
    /// 1. Look up the group and start a background create unless it is running
    /// 2. Poll until the group reports a state
    /// 3. Restart a group left in `Succeeded` or `Stopped`
    /// 4. Poll while the group is pending or running
    /// 5. Fetch the container logs, retrying while they are unavailable
    /// 6. Join the create call and classify the final state
    ///
    /// A creation error observed at any poll ends the run immediately without
    /// fetching logs.
    pub async fn deploy(&self, request: &DeploymentRequest) -> ControlResult<DeploymentOutcome> {
        info!(
            transaction_id = %request.transaction_id,
            resource_group = %request.resource_group,
            container_group = %request.container_group,
            image = %request.image,
            "starting deployment"
        );

        let result = match self.config.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, self.run(request))
                .await
                .unwrap_or_else(|_| {
                    Err(ControlError::DeadlineExceeded {
                        transaction_id: request.transaction_id.clone(),
                        after: deadline,
                    })
                }),
            None => self.run(request).await,
        };

        match &result {
            Ok(outcome) => info!(
                transaction_id = %outcome.transaction_id,
                container_group = %outcome.container_group,
                state = %outcome.state,
                "deployment finished"
            ),
            Err(e) => error!(
                transaction_id = %request.transaction_id,
                container_group = %request.container_group,
                error = %e,
                "deployment failed"
            ),
        }

        result
    }

    async fn run(&self, request: &DeploymentRequest) -> ControlResult<DeploymentOutcome> {
        let client = self.provider.connect(&request.credentials).await?;

        let mut create = self.reconcile(&client, request).await?;
        let mut group = self.await_materialised(&*client, request, &mut create).await?;

        if group.state.is_some_and(|s| s.needs_restart()) {
            group = self.restart(&*client, request).await?;
        }

        let group = self
            .await_completion(&*client, request, &mut create, group)
            .await?;

        let logs = self.drain_logs(&*client, request).await?;
        debug!(
            transaction_id = %request.transaction_id,
            container_group = %request.container_group,
            bytes = logs.len(),
            "retrieved container logs"
        );

        self.classify(request, create, &group, logs).await
    }

    async fn reconcile(
        &self,
        client: &Arc<dyn ResourceClient>,
        request: &DeploymentRequest,
    ) -> ControlResult<CreateTask> {
        let existing = client
            .get_by_name(&request.resource_group, &request.container_group)
            .await?;

        match existing.as_ref().and_then(|g| g.state) {
            Some(ResourceGroupState::Running) => {
                info!(
                    phase = %Phase::Reconciling,
                    transaction_id = %request.transaction_id,
                    container_group = %request.container_group,
                    "container group already running"
                );
                Ok(CreateTask::not_issued(&request.container_group))
            }
            state => {
                info!(
                    phase = %Phase::Reconciling,
                    transaction_id = %request.transaction_id,
                    container_group = %request.container_group,
                    existing = existing.is_some(),
                    state = state.map_or("null", |s| s.as_str()),
                    "creating container group"
                );
                Ok(CreateTask::spawn(
                    Arc::clone(client),
                    request.container_group_spec(),
                ))
            }
        }
    }

    async fn await_materialised(
        &self,
        client: &dyn ResourceClient,
        request: &DeploymentRequest,
        create: &mut CreateTask,
    ) -> ControlResult<ContainerGroup> {
        loop {
            if let Some(err) = create.take_failure() {
                return Err(err);
            }

            match client
                .get_by_name(&request.resource_group, &request.container_group)
                .await?
            {
                Some(group) if group.state.is_some() => {
                    debug!(
                        phase = %Phase::Materialising,
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        state = group.state_label(),
                        "container group materialised"
                    );
                    return Ok(group);
                }
                _ => {
                    info!(
                        phase = %Phase::Materialising,
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        "deploying..."
                    );
                    self.pause(self.config.materialise_interval()).await?;
                }
            }
        }
    }

    async fn restart(
        &self,
        client: &dyn ResourceClient,
        request: &DeploymentRequest,
    ) -> ControlResult<ContainerGroup> {
        info!(
            phase = %Phase::Restarting,
            transaction_id = %request.transaction_id,
            container_group = %request.container_group,
            "restarting container group"
        );

        client
            .start(&request.resource_group, &request.container_group)
            .await?;
        let group = client
            .refresh(&request.resource_group, &request.container_group)
            .await?;

        info!(
            phase = %Phase::Restarting,
            transaction_id = %request.transaction_id,
            container_group = %request.container_group,
            state = group.state_label(),
            "container group restarted"
        );
        Ok(group)
    }

    async fn await_completion(
        &self,
        client: &dyn ResourceClient,
        request: &DeploymentRequest,
        create: &mut CreateTask,
        mut group: ContainerGroup,
    ) -> ControlResult<ContainerGroup> {
        while group.is_active() {
            if let Some(err) = create.take_failure() {
                return Err(err);
            }

            self.pause(self.config.running_interval()).await?;
            group = client
                .refresh(&request.resource_group, &request.container_group)
                .await?;

            info!(
                phase = %Phase::AwaitingCompletion,
                transaction_id = %request.transaction_id,
                container_group = %request.container_group,
                state = group.state_label(),
                "container group state"
            );
        }

        if let Some(err) = create.take_failure() {
            return Err(err);
        }
        Ok(group)
    }

    async fn drain_logs(
        &self,
        client: &dyn ResourceClient,
        request: &DeploymentRequest,
    ) -> ControlResult<String> {
        let attempts = self.config.log_retry_attempts.max(1);
        let container = &request.container_group;
        let mut attempt = 1;

        loop {
            match client
                .get_logs(&request.resource_group, &request.container_group, container)
                .await
            {
                Ok(logs) => return Ok(logs),
                Err(err @ ControlError::LogsUnavailable(_)) if attempt < attempts => {
                    debug!(
                        phase = %Phase::DrainingLogs,
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        attempt,
                        error = %err,
                        "logs not available yet"
                    );
                    self.pause(self.config.log_retry_interval()).await?;
                    attempt += 1;
                }
                Err(err @ ControlError::LogsUnavailable(_)) => {
                    warn!(
                        phase = %Phase::DrainingLogs,
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        attempts,
                        "giving up on container logs"
                    );
                    return Err(ControlError::LogRetrievalExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn classify(
        &self,
        request: &DeploymentRequest,
        create: CreateTask,
        group: &ContainerGroup,
        logs: String,
    ) -> ControlResult<DeploymentOutcome> {
        create.join().await?;

        if group.has_failed(&request.container_group) {
            return Err(ControlError::TerminalFailure {
                transaction_id: request.transaction_id.clone(),
                container_group: request.container_group.clone(),
            });
        }

        let state = group.state.unwrap_or(ResourceGroupState::Absent);
        info!(
            phase = %Phase::Classifying,
            transaction_id = %request.transaction_id,
            container_group = %request.container_group,
            state = %state,
            "container group finished"
        );

        Ok(DeploymentOutcome {
            transaction_id: request.transaction_id.clone(),
            container_group: request.container_group.clone(),
            state,
            logs,
        })
    }

    async fn pause(&self, period: Duration) -> ControlResult<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(ControlError::Cancelled),
            () = tokio::time::sleep(period) => Ok(()),
        }
    }
}

impl std::fmt::Debug for DeploymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use crate::types::ResourceGroupState::{Pending, Running, Succeeded};

    fn request() -> DeploymentRequest {
        DeploymentRequest::from_message(
            br#"{"resourceGroupName": "rg", "group": "g1", "image": "repo/app:latest", "transactionId": "t1"}"#,
        )
        .unwrap()
    }

    fn controller(platform: &SimulatedPlatform, config: DeploymentConfig) -> DeploymentController {
        DeploymentController::new(Arc::new(platform.clone()), config)
    }

    #[tokio::test]
    async fn running_group_is_not_recreated() {
        let platform = SimulatedPlatform::new()
            .with_existing("rg", "g1", Running)
            .with_logs("still going");
        // The existing group keeps running until the deadline cuts it off.
        let config = DeploymentConfig {
            deadline_secs: Some(1),
            ..DeploymentConfig::fast()
        };

        let err = controller(&platform, config)
            .deploy(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::DeadlineExceeded { .. }));
        assert_eq!(platform.calls().create, 0);
        assert_eq!(platform.calls().get_logs, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_polling() {
        let platform = SimulatedPlatform::new().with_lifecycle([Pending, Running]);
        let cancel = CancellationToken::new();
        let controller = controller(
            &platform,
            DeploymentConfig {
                deadline_secs: None,
                ..DeploymentConfig::fast()
            },
        )
        .with_cancellation(cancel.clone());

        let handle = tokio::spawn(async move { controller.deploy(&request()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ControlError::Cancelled));
    }

    #[tokio::test]
    async fn unauthorized_credentials_fail_before_any_call() {
        let platform = SimulatedPlatform::new().with_required_client_id("ops");

        let err = controller(&platform, DeploymentConfig::fast())
            .deploy(&request())
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::Unauthorized(_)));
        assert_eq!(platform.calls().get_by_name, 0);
    }

    #[tokio::test]
    async fn null_state_keeps_materialise_loop_polling() {
        let platform = SimulatedPlatform::new()
            .with_transitional_observations(3)
            .with_logs("ok");

        let outcome = controller(&platform, DeploymentConfig::fast())
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(outcome.state, Succeeded);
        assert!(platform.calls().get_by_name >= 4);
    }
}
