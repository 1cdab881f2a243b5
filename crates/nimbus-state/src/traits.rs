use std::time::Duration;

use async_trait::async_trait;

use crate::error::{KvError, QueueError};
use crate::types::{Message, MessageId};

/// Byte-oriented key-value store.
///
/// Keys are flat strings; callers namespace them with `/`-separated prefixes
/// (`orchestration/{id}`, `entity/{name}/{key}`) and enumerate them with
/// [`KvBackend::list`].
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Lists keys under `prefix` in lexical order, resuming after `cursor`.
    ///
    /// The second element is the cursor for the next page, if any.
    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError>;

    /// Compare-and-swap. `expected = None` means "only if absent".
    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: &[u8]) -> Result<bool, KvError>;
}

/// At-least-once message queue with visibility timeouts.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn publish(&self, queue: &str, message: &[u8]) -> Result<MessageId, QueueError>;

    /// Takes the next visible message, hiding it for `visibility_timeout`.
    ///
    /// A message that is neither acked nor nacked before the timeout becomes
    /// visible again with its attempt counter incremented.
    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Message>, QueueError>;

    async fn ack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError>;

    /// Makes the message visible again immediately.
    async fn nack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError>;
}
