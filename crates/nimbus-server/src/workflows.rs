//! Programs and activities registered with the engine.
//!
//! `deploy_container` is the production workflow: a single `deploy_image`
//! step that hands the request to the [`DeploymentController`]. The other
//! programs are samples that exercise sequencing, fan-out and
//! continue-as-new against the same engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use nimbus_control::{ControlError, DeploymentController, DeploymentRequest};
use nimbus_durable::{
    Activity, ActivityContext, ActivityError, OrchestrationContext, OrchestrationError, Registry,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DemoSettings;

pub const DEPLOY_CONTAINER: &str = "deploy_container";
pub const DEPLOY_IMAGE: &str = "deploy_image";
pub const EXECUTE_JOB: &str = "execute_job";
pub const RECORD_ITERATION: &str = "record_iteration";
pub const SEQUENCE: &str = "sequence";
pub const FAN_OUT: &str = "fan_out";
pub const MONITOR: &str = "monitor";

const SEQUENCE_CITIES: [&str; 3] = ["Tokyo", "Seattle", "London"];
const FAN_OUT_CITIES: [&str; 3] = ["Frankfurt", "Seattle", "Sarajevo"];

/// Build the registry served by this process.
pub fn registry(controller: Arc<DeploymentController>, demo: &DemoSettings) -> Registry {
    Registry::builder()
        .activity(DEPLOY_IMAGE, DeployImage { controller })
        .activity(
            EXECUTE_JOB,
            ExecuteJob {
                delay: demo.job_delay(),
            },
        )
        .activity_fn(RECORD_ITERATION, |_ctx, input| async move { Ok(input) })
        .orchestration_fn(DEPLOY_CONTAINER, deploy_container)
        .orchestration_fn(SEQUENCE, sequence)
        .orchestration_fn(FAN_OUT, fan_out)
        .orchestration_fn(MONITOR, monitor)
        .build()
}

/// Runs one deployment to completion.
pub struct DeployImage {
    controller: Arc<DeploymentController>,
}

#[async_trait]
impl Activity for DeployImage {
    async fn run(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let request: DeploymentRequest = serde_json::from_value(input)?;

        tracing::info!(
            instance_id = %ctx.instance_id,
            transaction_id = %request.transaction_id,
            container_group = %request.container_group,
            "Deploying image"
        );

        let outcome = match self.controller.deploy(&request).await {
            Ok(outcome) => outcome,
            // Shutdown: leave the step unrecorded so recovery deploys again.
            Err(ControlError::Cancelled) => {
                return Err(ActivityError::interrupted(format!(
                    "transaction {}: deployment cancelled",
                    request.transaction_id
                )))
            }
            Err(e) => {
                if e.is_workload_failure() {
                    tracing::warn!(
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        error = %e,
                        "Workload failed"
                    );
                } else {
                    tracing::error!(
                        transaction_id = %request.transaction_id,
                        container_group = %request.container_group,
                        error = %e,
                        "Deployment could not be driven to completion"
                    );
                }
                return Err(ActivityError::new(format!(
                    "transaction {}: {e}",
                    request.transaction_id
                )));
            }
        };
        Ok(serde_json::to_value(outcome)?)
    }
}

/// Sample unit of work: waits, then greets.
pub struct ExecuteJob {
    delay: Duration,
}

#[async_trait]
impl Activity for ExecuteJob {
    async fn run(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let name = input
            .as_str()
            .ok_or_else(|| ActivityError::new("execute_job expects a string input"))?;

        tracing::debug!(instance_id = %ctx.instance_id, seq = ctx.seq, name, "Executing job");
        tokio::time::sleep(self.delay).await;
        Ok(json!(format!("Hello {name}!")))
    }
}

async fn deploy_container(
    ctx: OrchestrationContext,
    input: Value,
) -> Result<Value, OrchestrationError> {
    ctx.call_activity::<_, Value>(DEPLOY_IMAGE, &input).await
}

async fn sequence(ctx: OrchestrationContext, _input: Value) -> Result<Value, OrchestrationError> {
    let mut outputs = Vec::with_capacity(SEQUENCE_CITIES.len());
    for city in SEQUENCE_CITIES {
        outputs.push(ctx.call_activity::<_, String>(EXECUTE_JOB, city).await?);
    }
    Ok(json!(outputs))
}

async fn fan_out(ctx: OrchestrationContext, _input: Value) -> Result<Value, OrchestrationError> {
    let jobs: Vec<_> = FAN_OUT_CITIES
        .into_iter()
        .map(|city| ctx.call_activity::<_, String>(EXECUTE_JOB, city))
        .collect();

    let outputs = join_all(jobs)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!(outputs))
}

/// Input of one `monitor` epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorInput {
    /// Iterations completed by earlier epochs.
    #[serde(default)]
    pub iteration: u64,
    /// Iteration count at which the loop stops.
    #[serde(default = "default_monitor_limit")]
    pub limit: u64,
}

impl Default for MonitorInput {
    fn default() -> Self {
        Self {
            iteration: 0,
            limit: default_monitor_limit(),
        }
    }
}

const fn default_monitor_limit() -> u64 {
    10
}

/// One iteration per epoch, carried forward through continue-as-new.
async fn monitor(ctx: OrchestrationContext, input: Value) -> Result<Value, OrchestrationError> {
    let input: MonitorInput = if input.is_null() {
        MonitorInput::default()
    } else {
        serde_json::from_value(input)?
    };

    let seen = ctx
        .call_activity::<_, u64>(RECORD_ITERATION, &(input.iteration + 1))
        .await?;
    ctx.set_custom_status(&json!({ "iteration": seen }))?;

    if seen >= input.limit {
        return Ok(json!({ "iterations": seen }));
    }

    ctx.continue_as_new(&MonitorInput {
        iteration: seen,
        limit: input.limit,
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn monitor_input_defaults() {
        let input: MonitorInput = serde_json::from_value(json!({})).unwrap();
        assert_eq!(input, MonitorInput::default());
        assert_eq!(input.limit, 10);

        let input: MonitorInput = serde_json::from_value(json!({"limit": 3})).unwrap();
        assert_eq!(input.iteration, 0);
        assert_eq!(input.limit, 3);
    }
}
