use std::fmt;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
    /// Delivery count, starting at 1 on first receive.
    pub attempt: u32,
    pub enqueued_at: SystemTime,
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: MessageId::generate(),
            payload,
            attempt: 0,
            enqueued_at: SystemTime::now(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_undelivered_with_fresh_id() {
        let a = Message::new(b"{}".to_vec());
        let b = Message::new(b"{}".to_vec());
        assert_eq!(a.attempt, 0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.to_string(), a.id.as_str());
    }
}
