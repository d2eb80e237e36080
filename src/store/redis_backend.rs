use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use super::backend::{BackendError, MessageStream, PubSubBackend};

/// Timeout applied to every Redis round trip
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed pub/sub and TTL cache
///
/// Commands share one auto-reconnecting [`ConnectionManager`]; every
/// subscription gets a dedicated pub/sub connection that is closed when its
/// stream is dropped.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis and verify the server answers `PING`
    pub async fn connect(redis_url: &str) -> Result<Self, BackendError> {
        tracing::info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url)?;
        let connection = tokio::time::timeout(COMMAND_TIMEOUT, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BackendError::Timeout(COMMAND_TIMEOUT))??;

        let backend = Self { client, connection };
        backend.ping().await?;

        tracing::info!("Successfully connected to Redis");
        Ok(backend)
    }

    async fn with_timeout<T, F>(future: F) -> Result<T, BackendError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(COMMAND_TIMEOUT, future)
            .await
            .map_err(|_| BackendError::Timeout(COMMAND_TIMEOUT))?
            .map_err(BackendError::from)
    }
}

#[async_trait]
impl PubSubBackend for RedisBackend {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        Self::with_timeout(conn.publish::<_, _, ()>(channel, payload)).await
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BackendError> {
        let conn = Self::with_timeout(self.client.get_async_connection()).await?;
        let mut pubsub = conn.into_pubsub();
        Self::with_timeout(pubsub.subscribe(channel)).await?;

        tracing::info!("Subscribed to Redis channel: {}", channel);

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let decoded = msg.get_payload::<String>().map_err(|e| {
                tracing::warn!("Dropping non-text payload on '{}': {}", channel, e);
            });
            async move { decoded.ok() }
        });

        Ok(stream.boxed())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut conn = self.connection.clone();
        Self::with_timeout(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let command = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .to_owned();
        Self::with_timeout(command.query_async::<_, ()>(&mut conn)).await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection.clone();
        let pong: String = Self::with_timeout(redis::cmd("PING").query_async(&mut conn)).await?;
        if pong != "PONG" {
            return Err(BackendError::Unavailable(format!("unexpected PING reply: {}", pong)));
        }
        Ok(())
    }
}
