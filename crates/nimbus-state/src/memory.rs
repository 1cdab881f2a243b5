use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::trace;

use crate::error::{KvError, QueueError};
use crate::traits::{KvBackend, QueueBackend};
use crate::types::{Message, MessageId};

/// In-process key-value store.
///
/// Keys are kept ordered so prefix listings come back sorted without a
/// separate pass.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError> {
        let data = self.data.read().await;

        let mut keys: Vec<String> = data
            .range(prefix.to_owned()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .filter(|k| cursor.map_or(true, |c| k.as_str() > c))
            .take(limit.saturating_add(1))
            .cloned()
            .collect();

        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };

        Ok((keys, next))
    }

    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: &[u8]) -> Result<bool, KvError> {
        let mut data = self.data.write().await;

        let matches = match (expected, data.get(key)) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == cur.as_slice(),
            _ => false,
        };

        if matches {
            data.insert(key.to_owned(), new.to_vec());
        }

        Ok(matches)
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    message: Message,
    visible_at: Instant,
}

/// In-process queue with visibility timeouts.
///
/// Queues are created on first publish. A received message stays in place,
/// hidden until its visibility deadline, so an unacked message is redelivered
/// in its original position.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    queues: Arc<Mutex<HashMap<String, VecDeque<Delivery>>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still held by `queue`, visible or in flight.
    pub async fn depth(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn publish(&self, queue: &str, message: &[u8]) -> Result<MessageId, QueueError> {
        let message = Message::new(message.to_vec());
        let id = message.id.clone();

        self.queues
            .lock()
            .await
            .entry(queue.to_owned())
            .or_default()
            .push_back(Delivery {
                message,
                visible_at: Instant::now(),
            });

        trace!(queue, message_id = %id, "message published");
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<Message>, QueueError> {
        let mut queues = self.queues.lock().await;
        let Some(deliveries) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        let next = deliveries.iter_mut().find(|d| d.visible_at <= now);

        Ok(next.map(|delivery| {
            delivery.visible_at = now + visibility_timeout;
            delivery.message.attempt += 1;
            delivery.message.clone()
        }))
    }

    async fn ack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let deliveries = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;

        let position = deliveries
            .iter()
            .position(|d| d.message.id == *message_id)
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;

        deliveries.remove(position);
        Ok(())
    }

    async fn nack(&self, queue: &str, message_id: &MessageId) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let deliveries = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;

        let delivery = deliveries
            .iter_mut()
            .find(|d| d.message.id == *message_id)
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;

        delivery.visible_at = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kv_put_get_delete() {
        let kv = MemoryKv::new();

        assert!(kv.get("orchestration/a").await.unwrap().is_none());

        kv.put("orchestration/a", b"{}").await.unwrap();
        assert_eq!(
            kv.get("orchestration/a").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(kv.exists("orchestration/a").await.unwrap());

        assert!(kv.delete("orchestration/a").await.unwrap());
        assert!(!kv.delete("orchestration/a").await.unwrap());
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn kv_put_overwrites() {
        let kv = MemoryKv::new();

        kv.put("entity/counter/a", b"1").await.unwrap();
        kv.put("entity/counter/a", b"2").await.unwrap();
        assert_eq!(kv.get("entity/counter/a").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn kv_cas_only_if_absent_then_swap() {
        let kv = MemoryKv::new();

        assert!(kv.cas("k", None, b"v1").await.unwrap());
        assert!(!kv.cas("k", None, b"v2").await.unwrap());
        assert!(!kv.cas("k", Some(b"stale"), b"v2").await.unwrap());
        assert!(kv.cas("k", Some(b"v1"), b"v2").await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn kv_list_pages_by_prefix() {
        let kv = MemoryKv::new();
        for key in ["entity/counter/a", "entity/counter/b", "entity/counter/c"] {
            kv.put(key, b"0").await.unwrap();
        }
        kv.put("orchestration/x", b"{}").await.unwrap();

        let (page, next) = kv.list("entity/counter/", 2, None).await.unwrap();
        assert_eq!(page, vec!["entity/counter/a", "entity/counter/b"]);
        assert_eq!(next.as_deref(), Some("entity/counter/b"));

        let (page, next) = kv
            .list("entity/counter/", 2, next.as_deref())
            .await
            .unwrap();
        assert_eq!(page, vec!["entity/counter/c"]);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn queue_receive_then_ack() {
        let queue = MemoryQueue::new();

        let id = queue.publish("deployimage", b"payload").await.unwrap();
        let msg = queue
            .receive("deployimage", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(msg.id, id);
        assert_eq!(msg.payload, b"payload");
        assert_eq!(msg.attempt, 1);

        queue.ack("deployimage", &id).await.unwrap();
        assert_eq!(queue.depth("deployimage").await, 0);
        assert!(queue
            .receive("deployimage", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn queue_redelivers_after_visibility_timeout() {
        let queue = MemoryQueue::new();

        queue.publish("q", b"m").await.unwrap();
        let first = queue
            .receive("q", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();

        assert!(queue
            .receive("q", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = queue
            .receive("q", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn queue_nack_makes_message_visible() {
        let queue = MemoryQueue::new();

        queue.publish("q", b"m").await.unwrap();
        let msg = queue
            .receive("q", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        queue.nack("q", &msg.id).await.unwrap();

        let again = queue
            .receive("q", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, msg.id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn queue_ack_unknown_message() {
        let queue = MemoryQueue::new();

        let err = queue.ack("missing", &MessageId::new("x")).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(_)));

        queue.publish("q", b"m").await.unwrap();
        let err = queue.ack("q", &MessageId::new("x")).await.unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound(_)));
    }
}
