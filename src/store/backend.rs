use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a pub/sub backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Stream of raw payloads received on one subscribed channel.
///
/// Dropping the stream releases the underlying subscription.
pub type MessageStream = BoxStream<'static, String>;

/// Key/value cache with TTL plus channel publish/subscribe.
///
/// Implemented by Redis for multi-process deployments and by
/// [`MemoryBackend`](super::MemoryBackend) for single-process runs and tests.
#[async_trait]
pub trait PubSubBackend: Send + Sync {
    /// Publish a payload to every current subscriber of `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError>;

    /// Subscribe to `channel`; the subscription is active once this returns
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BackendError>;

    /// Read a key; `Ok(None)` when the key is missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Write a key that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError>;

    /// Verify the backend is reachable
    async fn ping(&self) -> Result<(), BackendError>;
}
