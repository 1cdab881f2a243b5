//! Entry point for deployment requests.
//!
//! Requests arrive either as queue messages or over HTTP. Both paths decode
//! and validate the payload once, then start a `deploy_container`
//! orchestration with the validated request as its input.

use std::sync::Arc;
use std::time::Duration;

use nimbus_control::{ControlError, DeploymentRequest};
use nimbus_durable::{EngineError, InstanceId, OrchestrationEngine};
use nimbus_state::{Message, QueueBackend, QueueError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerSettings;
use crate::workflows::DEPLOY_CONTAINER;

/// Errors raised while dispatching a request.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The payload could not be decoded or failed validation.
    #[error(transparent)]
    Malformed(#[from] ControlError),

    /// The engine could not start the instance.
    #[error("failed to start orchestration: {0}")]
    Engine(#[from] EngineError),

    /// The queue backend failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl DispatchError {
    /// Whether retrying the same payload can never succeed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Starts deployment orchestrations from raw payloads.
#[derive(Clone)]
pub struct Dispatcher {
    engine: OrchestrationEngine,
}

impl Dispatcher {
    #[must_use]
    pub fn new(engine: OrchestrationEngine) -> Self {
        Self { engine }
    }

    /// Validate `payload` and start a deployment under a fresh instance id.
    pub async fn dispatch(&self, payload: &[u8]) -> Result<InstanceId, DispatchError> {
        let request = DeploymentRequest::from_message(payload)?;
        let input = serde_json::to_value(&request).map_err(EngineError::from)?;
        let instance_id = self.engine.start(DEPLOY_CONTAINER, input).await?;

        info!(
            instance_id = %instance_id,
            transaction_id = %request.transaction_id,
            "Deployment dispatched"
        );
        Ok(instance_id)
    }

    /// Start the deployment carried by a queue message.
    ///
    /// The instance id is derived from the message id, so a redelivered
    /// message finds its instance already started instead of deploying twice.
    pub async fn dispatch_message(&self, message: &Message) -> Result<InstanceId, DispatchError> {
        let request = DeploymentRequest::from_message(&message.payload)?;
        let input = serde_json::to_value(&request).map_err(EngineError::from)?;
        let instance_id = message_instance_id(message);

        match self
            .engine
            .start_with_id(instance_id, DEPLOY_CONTAINER, input)
            .await
        {
            Ok(instance_id) => {
                info!(
                    instance_id = %instance_id,
                    transaction_id = %request.transaction_id,
                    attempt = message.attempt,
                    "Deployment dispatched"
                );
                Ok(instance_id)
            }
            Err(EngineError::InstanceExists(instance_id)) => {
                debug!(instance_id = %instance_id, "Deployment already started");
                Ok(instance_id)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Instance id used for the deployment carried by `message`.
#[must_use]
pub fn message_instance_id(message: &Message) -> InstanceId {
    InstanceId::new(format!("deploy-{}", message.id))
}

/// What one receive attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The queue was empty.
    Idle,
    /// A deployment was started (or had already been started) and the message acked.
    Started(InstanceId),
    /// The payload was malformed; the message was acked and dropped.
    Discarded,
    /// Starting failed; the message was nacked for redelivery.
    Requeued,
}

/// Pulls deployment requests off a queue and hands them to the [`Dispatcher`].
pub struct QueueConsumer {
    queue: Arc<dyn QueueBackend>,
    dispatcher: Dispatcher,
    queue_name: String,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl QueueConsumer {
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        dispatcher: Dispatcher,
        settings: &ServerSettings,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            queue_name: settings.queue.clone(),
            poll_interval: settings.receive_poll_interval(),
            visibility_timeout: settings.visibility_timeout(),
        }
    }

    /// Receive and handle at most one message.
    pub async fn poll_once(&self) -> Result<Delivery, DispatchError> {
        let Some(message) = self
            .queue
            .receive(&self.queue_name, self.visibility_timeout)
            .await?
        else {
            return Ok(Delivery::Idle);
        };

        match self.dispatcher.dispatch_message(&message).await {
            Ok(instance_id) => {
                self.queue.ack(&self.queue_name, &message.id).await?;
                Ok(Delivery::Started(instance_id))
            }
            Err(e) if e.is_malformed() => {
                warn!(
                    queue = %self.queue_name,
                    message_id = %message.id,
                    error = %e,
                    "Discarding malformed deployment request"
                );
                self.queue.ack(&self.queue_name, &message.id).await?;
                Ok(Delivery::Discarded)
            }
            Err(e) => {
                error!(
                    queue = %self.queue_name,
                    message_id = %message.id,
                    attempt = message.attempt,
                    error = %e,
                    "Failed to dispatch deployment, requeueing"
                );
                self.queue.nack(&self.queue_name, &message.id).await?;
                Ok(Delivery::Requeued)
            }
        }
    }

    /// Run the consumer loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = %self.queue_name, "Queue consumer started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(queue = %self.queue_name, "Queue consumer shutting down");
                    break;
                }

                result = self.poll_once() => {
                    let pause = match result {
                        Ok(Delivery::Started(_) | Delivery::Discarded) => false,
                        Ok(Delivery::Idle | Delivery::Requeued) => true,
                        Err(e) => {
                            error!(queue = %self.queue_name, error = %e, "Queue receive failed");
                            true
                        }
                    };
                    if pause {
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            () = tokio::time::sleep(self.poll_interval) => {}
                        }
                    }
                }
            }
        }

        info!(queue = %self.queue_name, "Queue consumer stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nimbus_state::MessageId;

    #[test]
    fn message_ids_map_to_stable_instance_ids() {
        let mut message = Message::new(b"{}".to_vec());
        message.id = MessageId::new("m-1");
        assert_eq!(message_instance_id(&message).as_str(), "deploy-m-1");
        assert_eq!(message_instance_id(&message), message_instance_id(&message.clone()));
    }

    #[test]
    fn only_decode_failures_are_malformed() {
        let malformed = DispatchError::from(ControlError::malformed("missing image"));
        assert!(malformed.is_malformed());
        assert_eq!(malformed.to_string(), "malformed deployment request: missing image");

        let engine = DispatchError::from(EngineError::UnknownProgram("x".to_owned()));
        assert!(!engine.is_malformed());
    }
}
