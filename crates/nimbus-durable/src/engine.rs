//! Replay-driven orchestration engine.
//!
//! Every instance is driven by one task. The task runs the program in
//! *episodes*: the program is polled once against the recorded history, the
//! steps it could not answer from history are dispatched, their results are
//! appended, and the next episode starts. Every change to the record is
//! checkpointed to the [`KvBackend`] before the driver moves on, so a crashed
//! driver can be resumed from the stored record alone.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use nimbus_state::KvBackend;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::context::{Episode, OrchestrationContext, PendingActivity};
use crate::error::{EngineError, EngineResult, OrchestrationError};
use crate::history::{HistoryEvent, InstanceId, InstanceRecord, InstanceStatus, INSTANCE_PREFIX};
use crate::registry::{ActivityContext, Orchestration, Registry};

const RECOVER_PAGE_SIZE: usize = 100;

/// Runs orchestration programs to completion against a key-value store.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    kv: Arc<dyn KvBackend>,
    registry: Registry,
    config: EngineConfig,
    active: DashSet<InstanceId>,
}

/// How an episode ended.
#[derive(Debug)]
enum Settlement {
    Completed(Value),
    Failed(String),
    ContinueAsNew(Value),
    Dispatch(Vec<PendingActivity>),
}

impl OrchestrationEngine {
    #[must_use]
    pub fn new(kv: Arc<dyn KvBackend>, registry: Registry, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                kv,
                registry,
                config,
                active: DashSet::new(),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Start a new instance of `program` under a generated id.
    pub async fn start(&self, program: &str, input: Value) -> EngineResult<InstanceId> {
        self.start_with_id(InstanceId::generate(), program, input)
            .await
    }

    /// Start a new instance under a caller-chosen id.
    ///
    /// Fails with [`EngineError::InstanceExists`] if the id is taken, whatever
    /// the status of the existing instance.
    pub async fn start_with_id(
        &self,
        instance_id: InstanceId,
        program: &str,
        input: Value,
    ) -> EngineResult<InstanceId> {
        if !self.inner.registry.has_orchestration(program) {
            return Err(EngineError::UnknownProgram(program.to_owned()));
        }

        let record = InstanceRecord::new(instance_id.clone(), program, input);
        let bytes = serde_json::to_vec(&record)?;
        let created = self
            .inner
            .kv
            .cas(&instance_id.storage_key(), None, &bytes)
            .await?;
        if !created {
            return Err(EngineError::InstanceExists(instance_id));
        }

        info!(instance_id = %instance_id, program, "Orchestration scheduled");
        self.spawn_driver(instance_id.clone());
        Ok(instance_id)
    }

    /// Current status of an instance.
    pub async fn query(&self, instance_id: &InstanceId) -> EngineResult<Option<InstanceStatus>> {
        Ok(self
            .record(instance_id)
            .await?
            .map(|record| record.status_view()))
    }

    /// The full persisted record, history included.
    pub async fn record(&self, instance_id: &InstanceId) -> EngineResult<Option<InstanceRecord>> {
        match self.inner.kv.get(&instance_id.storage_key()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Wait until the instance is `Completed` or `Failed`.
    pub async fn wait_for_completion(
        &self,
        instance_id: &InstanceId,
        timeout: Duration,
    ) -> EngineResult<InstanceStatus> {
        tokio::time::timeout(timeout, self.poll_until_terminal(instance_id))
            .await
            .map_err(|_| EngineError::Timeout {
                instance_id: instance_id.clone(),
                after: timeout,
            })?
    }

    async fn poll_until_terminal(&self, instance_id: &InstanceId) -> EngineResult<InstanceStatus> {
        let interval = self.inner.config.completion_poll_interval();
        loop {
            match self.record(instance_id).await? {
                Some(record) if record.is_terminal() => return Ok(record.status_view()),
                Some(_) => tokio::time::sleep(interval).await,
                None => return Err(EngineError::InstanceNotFound(instance_id.clone())),
            }
        }
    }

    /// Drive a persisted, unfinished instance again.
    ///
    /// Returns `false` if the instance is already terminal. Steps that were
    /// scheduled but never recorded a result are dispatched again.
    pub async fn resume(&self, instance_id: &InstanceId) -> EngineResult<bool> {
        let record = self
            .record(instance_id)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.clone()))?;
        if record.is_terminal() {
            return Ok(false);
        }
        self.spawn_driver(instance_id.clone());
        Ok(true)
    }

    /// Resume every unfinished instance in the store.
    pub async fn recover(&self) -> EngineResult<Vec<InstanceId>> {
        let mut resumed = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let (keys, next) = self
                .inner
                .kv
                .list(INSTANCE_PREFIX, RECOVER_PAGE_SIZE, cursor.as_deref())
                .await?;

            for key in keys {
                let Some(id) = key.strip_prefix(INSTANCE_PREFIX) else {
                    continue;
                };
                let instance_id = InstanceId::new(id);
                match self.resume(&instance_id).await {
                    Ok(true) => resumed.push(instance_id),
                    Ok(false) => {}
                    Err(e) => warn!(instance_id = %instance_id, error = %e, "Skipping unreadable instance"),
                }
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if !resumed.is_empty() {
            info!(count = resumed.len(), "Recovered unfinished orchestrations");
        }
        Ok(resumed)
    }

    fn spawn_driver(&self, instance_id: InstanceId) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.drive(&instance_id).await {
                error!(instance_id = %instance_id, error = %e, "Orchestration driver stopped");
            }
        });
    }

    async fn drive(&self, instance_id: &InstanceId) -> EngineResult<()> {
        let Some(_guard) = ActiveGuard::acquire(&self.inner.active, instance_id) else {
            debug!(instance_id = %instance_id, "Instance already being driven");
            return Ok(());
        };

        let mut record = self
            .record(instance_id)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.clone()))?;
        if record.is_terminal() {
            return Ok(());
        }

        let Some(program) = self.inner.registry.orchestration(&record.program) else {
            let err = EngineError::UnknownProgram(record.program.clone());
            record.fail(err.to_string());
            self.save(&record).await?;
            return Err(err);
        };

        record.mark_running();
        self.save(&record).await?;
        info!(
            instance_id = %instance_id,
            program = %record.program,
            epoch = record.epoch,
            steps = record.scheduled_steps(),
            "Orchestration running"
        );

        loop {
            let (polled, episode) = run_episode(program.as_ref(), &record);
            record.custom_status.clone_from(&episode.custom_status);

            match settle(polled, episode) {
                Settlement::Completed(output) => {
                    record.complete(output);
                    self.save(&record).await?;
                    info!(instance_id = %instance_id, epoch = record.epoch, "Orchestration completed");
                    return Ok(());
                }
                Settlement::Failed(message) => {
                    record.fail(message.clone());
                    self.save(&record).await?;
                    warn!(instance_id = %instance_id, epoch = record.epoch, error = %message, "Orchestration failed");
                    return Ok(());
                }
                Settlement::ContinueAsNew(input) => {
                    record.continue_as_new(input);
                    self.save(&record).await?;
                    info!(instance_id = %instance_id, epoch = record.epoch, "Orchestration continued as new");
                    record.mark_running();
                }
                Settlement::Dispatch(pending) => {
                    if !self.dispatch(&mut record, pending).await? {
                        info!(
                            instance_id = %instance_id,
                            epoch = record.epoch,
                            "Orchestration interrupted, left for recovery"
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one batch of activities, checkpointing before and after each.
    ///
    /// Returns `false` if any activity was interrupted. Its step stays
    /// scheduled without a result, so the next driver dispatches it again.
    async fn dispatch(
        &self,
        record: &mut InstanceRecord,
        pending: Vec<PendingActivity>,
    ) -> EngineResult<bool> {
        for activity in pending.iter().filter(|a| a.is_new) {
            record.append(HistoryEvent::ActivityScheduled {
                seq: activity.seq,
                name: activity.name.clone(),
                input: activity.input.clone(),
            });
        }
        self.save(record).await?;

        let mut running: FuturesUnordered<_> = pending
            .into_iter()
            .map(|activity| self.run_activity(record, activity))
            .collect();

        let mut interrupted = false;
        while let Some((seq, outcome)) = running.next().await {
            let event = match outcome {
                StepOutcome::Completed(result) => HistoryEvent::ActivityCompleted { seq, result },
                StepOutcome::Failed(error) => HistoryEvent::ActivityFailed { seq, error },
                StepOutcome::Interrupted => {
                    interrupted = true;
                    continue;
                }
            };
            record.append(event);
            self.save(record).await?;
        }
        Ok(!interrupted)
    }

    fn run_activity(
        &self,
        record: &InstanceRecord,
        pending: PendingActivity,
    ) -> impl std::future::Future<Output = (u64, StepOutcome)> + Send + 'static {
        let activity = self.inner.registry.activity(&pending.name);
        let ctx = ActivityContext {
            instance_id: record.instance_id.clone(),
            epoch: record.epoch,
            seq: pending.seq,
            name: pending.name,
        };
        let input = pending.input;

        async move {
            let seq = ctx.seq;
            let Some(activity) = activity else {
                return (seq, StepOutcome::Failed(format!("unknown activity: {}", ctx.name)));
            };

            debug!(
                instance_id = %ctx.instance_id,
                epoch = ctx.epoch,
                seq,
                activity = %ctx.name,
                "Dispatching activity"
            );
            let log_ctx = ctx.clone();
            let outcome = match tokio::spawn(async move { activity.run(ctx, input).await }).await {
                Ok(Ok(output)) => StepOutcome::Completed(output),
                Ok(Err(e)) if e.interrupted => {
                    info!(
                        instance_id = %log_ctx.instance_id,
                        epoch = log_ctx.epoch,
                        seq,
                        activity = %log_ctx.name,
                        reason = %e.message,
                        "Activity interrupted"
                    );
                    StepOutcome::Interrupted
                }
                Ok(Err(e)) => StepOutcome::Failed(e.message),
                Err(e) => StepOutcome::Failed(format!("activity panicked: {e}")),
            };
            if let StepOutcome::Failed(e) = &outcome {
                warn!(
                    instance_id = %log_ctx.instance_id,
                    epoch = log_ctx.epoch,
                    seq,
                    activity = %log_ctx.name,
                    error = %e,
                    "Activity failed"
                );
            }
            (seq, outcome)
        }
    }

    async fn save(&self, record: &InstanceRecord) -> EngineResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.inner
            .kv
            .put(&record.instance_id.storage_key(), &bytes)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .field("active", &self.inner.active.len())
            .finish_non_exhaustive()
    }
}

/// How one dispatched activity ended.
enum StepOutcome {
    Completed(Value),
    Failed(String),
    Interrupted,
}

/// Poll the program once against the record's history.
fn run_episode(
    program: &dyn Orchestration,
    record: &InstanceRecord,
) -> (Option<Result<Value, OrchestrationError>>, Episode) {
    let ctx = OrchestrationContext::new(
        record.instance_id.clone(),
        record.epoch,
        &record.history,
        record.custom_status.clone(),
    );
    let polled = AssertUnwindSafe(program.run(ctx.clone(), record.input.clone()))
        .catch_unwind()
        .now_or_never()
        .map(|outcome| {
            outcome.unwrap_or_else(|_| Err(OrchestrationError::custom("orchestration panicked")))
        });
    (polled, ctx.finish())
}

fn settle(polled: Option<Result<Value, OrchestrationError>>, episode: Episode) -> Settlement {
    if let Some(message) = episode.inconsistency {
        return Settlement::Failed(OrchestrationError::ReplayInconsistency(message).to_string());
    }
    if let Some(input) = episode.continue_with {
        return Settlement::ContinueAsNew(input);
    }

    match polled {
        Some(Ok(_)) if episode.requested_steps < episode.recorded_steps => Settlement::Failed(
            OrchestrationError::ReplayInconsistency(format!(
                "program completed after {} of {} recorded steps",
                episode.requested_steps, episode.recorded_steps
            ))
            .to_string(),
        ),
        Some(Ok(output)) => Settlement::Completed(output),
        Some(Err(e)) => Settlement::Failed(e.to_string()),
        None if episode.pending.is_empty() => Settlement::Failed(
            OrchestrationError::ReplayInconsistency(
                "program suspended without scheduling an activity".to_owned(),
            )
            .to_string(),
        ),
        None => Settlement::Dispatch(episode.pending),
    }
}

/// Marks an instance as driven for as long as it lives.
struct ActiveGuard<'a> {
    active: &'a DashSet<InstanceId>,
    instance_id: InstanceId,
}

impl<'a> ActiveGuard<'a> {
    fn acquire(active: &'a DashSet<InstanceId>, instance_id: &InstanceId) -> Option<Self> {
        active.insert(instance_id.clone()).then(|| Self {
            active,
            instance_id: instance_id.clone(),
        })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.instance_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn episode(requested: u64, recorded: u64) -> Episode {
        Episode {
            requested_steps: requested,
            recorded_steps: recorded,
            ..Episode::default()
        }
    }

    #[test]
    fn ready_output_completes() {
        let settled = settle(Some(Ok(json!(1))), episode(2, 2));
        assert!(matches!(settled, Settlement::Completed(v) if v == json!(1)));
    }

    #[test]
    fn skipping_recorded_steps_is_an_inconsistency() {
        let settled = settle(Some(Ok(json!(1))), episode(1, 2));
        assert!(matches!(settled, Settlement::Failed(m) if m.starts_with("replay inconsistency")));
    }

    #[test]
    fn suspending_without_work_is_an_inconsistency() {
        let settled = settle(None, episode(0, 0));
        assert!(matches!(settled, Settlement::Failed(m) if m.contains("without scheduling")));
    }

    #[test]
    fn swallowed_inconsistency_still_fails() {
        let mut ep = episode(1, 1);
        ep.inconsistency = Some("step 0 renamed".to_owned());
        let settled = settle(Some(Ok(Value::Null)), ep);
        assert!(matches!(settled, Settlement::Failed(m) if m.contains("step 0 renamed")));
    }

    #[test]
    fn continue_as_new_wins_over_output() {
        let mut ep = episode(0, 0);
        ep.continue_with = Some(json!(5));
        let settled = settle(Some(Ok(Value::Null)), ep);
        assert!(matches!(settled, Settlement::ContinueAsNew(v) if v == json!(5)));
    }

    #[test]
    fn guard_releases_on_drop() {
        let active = DashSet::new();
        let id = InstanceId::new("i1");
        let guard = ActiveGuard::acquire(&active, &id).unwrap();
        assert!(ActiveGuard::acquire(&active, &id).is_none());
        drop(guard);
        assert!(ActiveGuard::acquire(&active, &id).is_some());
    }
}
