//! Replay context handed to orchestration programs.
//!
//! A program is re-run from the top on every episode. Each effectful call goes
//! through the context, which assigns it the next step index and checks the
//! history: a recorded result resolves immediately, anything else is queued
//! for dispatch and suspends the program for the rest of the episode.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::OrchestrationError;
use crate::history::{HistoryEvent, InstanceId};

/// Context for one episode of one orchestration instance.
#[derive(Clone)]
pub struct OrchestrationContext {
    instance_id: InstanceId,
    epoch: u64,
    state: Arc<Mutex<ReplayState>>,
}

#[derive(Default)]
struct ReplayState {
    scheduled: HashMap<u64, (String, Value)>,
    results: HashMap<u64, Result<Value, String>>,
    next_seq: u64,
    pending: Vec<PendingActivity>,
    continue_with: Option<Value>,
    custom_status: Option<Value>,
    inconsistency: Option<String>,
}

/// An activity the engine has to run before the next episode.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingActivity {
    pub seq: u64,
    pub name: String,
    pub input: Value,
    /// Not yet in history; an `ActivityScheduled` event must be appended.
    pub is_new: bool,
}

/// What a single episode left behind.
#[derive(Debug, Default)]
pub(crate) struct Episode {
    pub pending: Vec<PendingActivity>,
    pub continue_with: Option<Value>,
    pub custom_status: Option<Value>,
    pub inconsistency: Option<String>,
    /// Steps the program requested during the episode.
    pub requested_steps: u64,
    /// Steps recorded in history before the episode.
    pub recorded_steps: u64,
}

enum Step {
    Replayed(Result<Value, String>),
    Suspended,
    Fault(OrchestrationError),
}

impl OrchestrationContext {
    pub(crate) fn new(
        instance_id: InstanceId,
        epoch: u64,
        history: &[HistoryEvent],
        custom_status: Option<Value>,
    ) -> Self {
        let mut state = ReplayState {
            custom_status,
            ..ReplayState::default()
        };
        for event in history {
            match event {
                HistoryEvent::ActivityScheduled { seq, name, input } => {
                    state.scheduled.insert(*seq, (name.clone(), input.clone()));
                }
                HistoryEvent::ActivityCompleted { seq, result } => {
                    state.results.insert(*seq, Ok(result.clone()));
                }
                HistoryEvent::ActivityFailed { seq, error } => {
                    state.results.insert(*seq, Err(error.clone()));
                }
            }
        }
        Self {
            instance_id,
            epoch,
            state: Arc::new(Mutex::new(state)),
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Execution number of the current epoch, starting at 1.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the next step will be answered from history.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        let state = self.state.lock();
        state.results.contains_key(&state.next_seq)
    }

    /// Call an activity.
    ///
    /// The step index is assigned when this is called, not when the returned
    /// future is first polled, so futures created in order and joined later
    /// keep their order across replays.
    pub fn call_activity<I, O>(
        &self,
        name: &str,
        input: &I,
    ) -> impl Future<Output = Result<O, OrchestrationError>> + Send + 'static
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        let step = match serde_json::to_value(input) {
            Ok(input) => self.schedule(name, input),
            Err(err) => {
                self.state.lock().next_seq += 1;
                Step::Fault(err.into())
            }
        };
        resolve(name.to_owned(), step)
    }

    /// Record a free-form progress value persisted with the instance.
    pub fn set_custom_status<S: Serialize + ?Sized>(
        &self,
        status: &S,
    ) -> Result<(), OrchestrationError> {
        let value = serde_json::to_value(status)?;
        self.state.lock().custom_status = Some(value);
        Ok(())
    }

    /// Restart the instance with `input` and an empty history.
    ///
    /// The returned future never resolves; the engine switches epochs once the
    /// episode ends.
    pub fn continue_as_new<I, T>(
        &self,
        input: &I,
    ) -> impl Future<Output = Result<T, OrchestrationError>> + Send + 'static
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        let step = match serde_json::to_value(input) {
            Ok(input) => {
                self.state.lock().continue_with = Some(input);
                Step::Suspended
            }
            Err(err) => Step::Fault(err.into()),
        };
        resolve("continue_as_new".to_owned(), step)
    }

    fn schedule(&self, name: &str, input: Value) -> Step {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;

        let recorded = state.scheduled.get(&seq).cloned();
        match recorded {
            Some((recorded_name, _)) if recorded_name != name => {
                let message = format!(
                    "step {seq} was recorded as {recorded_name} but the program now calls {name}"
                );
                state.inconsistency.get_or_insert_with(|| message.clone());
                Step::Fault(OrchestrationError::ReplayInconsistency(message))
            }
            Some((_, recorded_input)) => match state.results.get(&seq).cloned() {
                Some(result) => Step::Replayed(result),
                None => {
                    // Scheduled before a crash; run it again with the recorded input.
                    state.pending.push(PendingActivity {
                        seq,
                        name: name.to_owned(),
                        input: recorded_input,
                        is_new: false,
                    });
                    Step::Suspended
                }
            },
            None => {
                state.pending.push(PendingActivity {
                    seq,
                    name: name.to_owned(),
                    input,
                    is_new: true,
                });
                Step::Suspended
            }
        }
    }

    /// Drain what the episode produced.
    pub(crate) fn finish(&self) -> Episode {
        let mut state = self.state.lock();
        Episode {
            pending: std::mem::take(&mut state.pending),
            continue_with: state.continue_with.take(),
            custom_status: state.custom_status.clone(),
            inconsistency: state.inconsistency.take(),
            requested_steps: state.next_seq,
            recorded_steps: state.scheduled.len() as u64,
        }
    }
}

/// Turn a step into the future the program awaits.
fn resolve<O>(
    name: String,
    step: Step,
) -> impl Future<Output = Result<O, OrchestrationError>> + Send + 'static
where
    O: DeserializeOwned + Send + 'static,
{
    async move {
        match step {
            Step::Replayed(Ok(result)) => Ok(serde_json::from_value(result)?),
            Step::Replayed(Err(message)) => Err(OrchestrationError::ActivityFailed { name, message }),
            Step::Suspended => futures::future::pending().await,
            Step::Fault(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("instance_id", &self.instance_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
