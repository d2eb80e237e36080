use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::backend::{BackendError, MessageStream, PubSubBackend};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process pub/sub backend
///
/// Channels are tokio broadcast channels created on first use, the same way
/// the WebSocket broadcaster keeps one sender per topic. Keys live in a map
/// with a per-entry deadline checked on read.
#[derive(Clone)]
pub struct MemoryBackend {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    capacity: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a backend whose channels buffer up to `capacity` messages per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            entries: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    fn get_or_create_channel(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscriptions on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBackend for MemoryBackend {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        if let Some(sender) = self.channels.get(channel) {
            // No receivers is not an error, same as PUBLISH returning 0
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BackendError> {
        let receiver = self.get_or_create_channel(channel).subscribe();
        let channel = channel.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber on '{}' lagged, {} messages skipped", channel, skipped);
                        None
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BackendError> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
