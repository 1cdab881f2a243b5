//! Single-writer entities addressed by key.
//!
//! Every key gets its own bounded mailbox drained by one worker task, so
//! operations on a key are applied strictly one at a time while different
//! keys proceed in parallel. Workers hold the key's state in memory and
//! commit it to the [`KvBackend`] under `entity/{name}/{key}` before
//! replying. A worker that sees no traffic for the idle timeout closes its
//! mailbox, finishes what was already queued and deregisters; the next
//! operation on the key starts a fresh worker.

mod counter;

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nimbus_state::KvBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::EntityError;

pub use counter::{Counter, CounterOperation};

/// Key prefix under which entity state is stored.
pub const ENTITY_PREFIX: &str = "entity/";

/// Mailboxes a single delivery will try before giving up. Each retry
/// follows a worker that has fully stopped.
const MAX_DELIVERY_ATTEMPTS: usize = 3;

/// State type of an entity and the operations it accepts.
pub trait Entity: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity name, used in the storage key.
    const NAME: &'static str;

    type Operation: Debug + Send + 'static;
    type Output: Send + 'static;

    /// Apply one operation to the state.
    fn apply(&mut self, operation: Self::Operation) -> Effect<Self::Output>;
}

/// What an operation did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Unchanged,
    Updated,
    /// Persisted state is removed; the entity starts from its default again.
    Deleted,
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect<O> {
    pub output: O,
    pub change: StateChange,
}

impl<O> Effect<O> {
    pub fn read(output: O) -> Self {
        Self {
            output,
            change: StateChange::Unchanged,
        }
    }

    pub fn updated(output: O) -> Self {
        Self {
            output,
            change: StateChange::Updated,
        }
    }

    pub fn deleted(output: O) -> Self {
        Self {
            output,
            change: StateChange::Deleted,
        }
    }
}

/// Storage key of an entity instance.
#[must_use]
pub fn storage_key<E: Entity>(key: &str) -> String {
    format!("{ENTITY_PREFIX}{}/{key}", E::NAME)
}

type Reply<E> = oneshot::Sender<Result<<E as Entity>::Output, EntityError>>;

struct Envelope<E: Entity> {
    operation: E::Operation,
    reply: Option<Reply<E>>,
}

struct Mailbox<E: Entity> {
    sender: mpsc::Sender<Envelope<E>>,
    generation: u64,
    /// Flips to `true` once the worker has deregistered.
    stopped: watch::Receiver<bool>,
}

struct HostInner<E: Entity> {
    kv: Arc<dyn KvBackend>,
    mailboxes: DashMap<String, Mailbox<E>>,
    mailbox_depth: usize,
    idle_timeout: Duration,
    generations: AtomicU64,
}

/// Routes operations to per-key workers of entity type `E`.
pub struct EntityHost<E: Entity> {
    inner: Arc<HostInner<E>>,
}

impl<E: Entity> Clone for EntityHost<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> EntityHost<E> {
    #[must_use]
    pub fn new(kv: Arc<dyn KvBackend>, config: &EngineConfig) -> Self {
        Self::with_limits(kv, config.entity_mailbox_depth, config.entity_idle_timeout())
    }

    #[must_use]
    pub fn with_limits(kv: Arc<dyn KvBackend>, mailbox_depth: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HostInner {
                kv,
                mailboxes: DashMap::new(),
                mailbox_depth: mailbox_depth.max(1),
                idle_timeout,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Apply `operation` to `key` and wait for its output.
    pub async fn call(&self, key: &str, operation: E::Operation) -> Result<E::Output, EntityError> {
        let (reply, response) = oneshot::channel();
        self.deliver(
            key,
            Envelope {
                operation,
                reply: Some(reply),
            },
        )
        .await?;

        response.await.map_err(|_| EntityError::WorkerGone {
            entity: E::NAME,
            key: key.to_owned(),
        })?
    }

    /// Enqueue `operation` for `key` without waiting for it to be applied.
    ///
    /// Waits only while the key's mailbox is full.
    pub async fn signal(&self, key: &str, operation: E::Operation) -> Result<(), EntityError> {
        self.deliver(
            key,
            Envelope {
                operation,
                reply: None,
            },
        )
        .await
    }

    /// Committed state of `key`, bypassing the mailbox.
    ///
    /// A key with nothing stored reads as the default state, the same value
    /// a worker would start from.
    pub async fn read_state(&self, key: &str) -> Result<E, EntityError> {
        Ok(self.inner.load(key).await?.unwrap_or_default())
    }

    /// Number of keys with a live worker.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.inner.mailboxes.len()
    }

    async fn deliver(&self, key: &str, envelope: Envelope<E>) -> Result<(), EntityError> {
        let mut envelope = envelope;
        for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
            let (sender, mut stopped) = self.sender_for(key);
            match sender.send(envelope).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // The worker closed its mailbox and is draining. Its
                    // successor must not start until it has deregistered.
                    envelope = returned;
                    debug!(entity = E::NAME, key, attempt, "Mailbox closed, waiting for worker to stop");
                    let _ = stopped.wait_for(|stopped| *stopped).await;
                }
            }
        }

        warn!(entity = E::NAME, key, "Giving up on delivery after repeated mailbox shutdowns");
        Err(EntityError::WorkerGone {
            entity: E::NAME,
            key: key.to_owned(),
        })
    }

    fn sender_for(&self, key: &str) -> (mpsc::Sender<Envelope<E>>, watch::Receiver<bool>) {
        if let Some(mailbox) = self.inner.mailboxes.get(key) {
            return (mailbox.sender.clone(), mailbox.stopped.clone());
        }
        let mailbox = self
            .inner
            .mailboxes
            .entry(key.to_owned())
            .or_insert_with(|| self.spawn_worker(key));
        (mailbox.sender.clone(), mailbox.stopped.clone())
    }

    fn spawn_worker(&self, key: &str) -> Mailbox<E> {
        let (sender, receiver) = mpsc::channel(self.inner.mailbox_depth);
        let (stopped_tx, stopped) = watch::channel(false);
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let worker = Worker {
            inner: Arc::clone(&self.inner),
            key: key.to_owned(),
            generation,
            state: None,
            stopped: stopped_tx,
        };
        debug!(entity = E::NAME, key, generation, "Starting entity worker");
        tokio::spawn(worker.run(receiver));
        Mailbox {
            sender,
            generation,
            stopped,
        }
    }
}

impl<E: Entity> Debug for EntityHost<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHost")
            .field("entity", &E::NAME)
            .field("active_workers", &self.active_workers())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> HostInner<E> {
    async fn load(&self, key: &str) -> Result<Option<E>, EntityError> {
        match self.kv.get(&storage_key::<E>(key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

struct Worker<E: Entity> {
    inner: Arc<HostInner<E>>,
    key: String,
    generation: u64,
    /// In-memory copy of the committed state. `None` until first use or
    /// after a failed commit.
    state: Option<E>,
    stopped: watch::Sender<bool>,
}

impl<E: Entity> Worker<E> {
    async fn run(mut self, mut receiver: mpsc::Receiver<Envelope<E>>) {
        loop {
            match tokio::time::timeout(self.inner.idle_timeout, receiver.recv()).await {
                Ok(Some(envelope)) => self.process(envelope).await,
                Ok(None) => break,
                Err(_) => {
                    receiver.close();
                    while let Some(envelope) = receiver.recv().await {
                        self.process(envelope).await;
                    }
                    break;
                }
            }
        }
        debug!(entity = E::NAME, key = %self.key, generation = self.generation, "Entity worker idle, stopping");
    }

    async fn process(&mut self, envelope: Envelope<E>) {
        debug!(entity = E::NAME, key = %self.key, operation = ?envelope.operation, "Applying entity operation");
        let result = self.apply(envelope.operation).await;
        if let Err(e) = &result {
            warn!(entity = E::NAME, key = %self.key, error = %e, "Entity operation failed");
        }
        if let Some(reply) = envelope.reply {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }

    async fn apply(&mut self, operation: E::Operation) -> Result<E::Output, EntityError> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => self.inner.load(&self.key).await?.unwrap_or_default(),
        };

        let effect = state.apply(operation);
        let storage_key = storage_key::<E>(&self.key);
        match effect.change {
            StateChange::Unchanged => {}
            StateChange::Updated => {
                let bytes = serde_json::to_vec(&state)?;
                self.inner.kv.put(&storage_key, &bytes).await?;
            }
            StateChange::Deleted => {
                self.inner.kv.delete(&storage_key).await?;
                state = E::default();
            }
        }

        self.state = Some(state);
        Ok(effect.output)
    }
}

impl<E: Entity> Drop for Worker<E> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.inner
            .mailboxes
            .remove_if(&self.key, |_, mailbox| mailbox.generation == generation);
        self.stopped.send_replace(true);
    }
}
