use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("CAS conflict on key {0}")]
    Conflict(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Backend not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),
}
