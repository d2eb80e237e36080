use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backend::{BackendError, MessageStream, PubSubBackend};
use super::queue::{DropNewestQueue, Offer, QueueCounters};
use super::reconnect::ReconnectPolicy;
use crate::database::{run_blocking, PriceRepository};
use crate::error::PriceError;
use crate::models::PriceQuote;

/// Key holding the canonical serialized batch
pub const CACHE_KEY: &str = "goldprices:latest";

/// Channel consumed by the connection hub
pub const LIVE_UPDATE_CHANNEL: &str = "goldprices:updates";

/// Channel consumed by the persistence subscriber
pub const PERSISTENCE_CHANNEL: &str = "gold-prices-db";

pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Decoded batches buffered per subscription before new ones are dropped
pub const SUBSCRIPTION_BUFFER: usize = 100;

/// Canonical price cache, two-channel fan-out and durable-store fallback
///
/// Every publish writes the same serialized batch to the live-update channel,
/// the persistence channel and the TTL key. Reads hit the key first and fall
/// back to the durable store when it is missing or expired.
#[derive(Clone)]
pub struct PubSubStore {
    backend: Arc<dyn PubSubBackend>,
    repository: Arc<dyn PriceRepository>,
    reconnect: ReconnectPolicy,
}

impl PubSubStore {
    pub fn new(backend: Arc<dyn PubSubBackend>, repository: Arc<dyn PriceRepository>) -> Self {
        Self {
            backend,
            repository,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn repository(&self) -> Arc<dyn PriceRepository> {
        Arc::clone(&self.repository)
    }

    /// Publish a batch to both channels and refresh the canonical key
    ///
    /// Steps run in order and stop at the first failure; earlier steps are
    /// not rolled back.
    pub async fn publish(&self, quotes: &[PriceQuote]) -> Result<(), PriceError> {
        if quotes.is_empty() {
            return Err(PriceError::EmptyBatch);
        }

        let payload = serde_json::to_string(quotes)?;

        for channel in [LIVE_UPDATE_CHANNEL, PERSISTENCE_CHANNEL] {
            self.backend
                .publish(channel, &payload)
                .await
                .map_err(|source| publish_error(channel, source))?;
        }

        self.backend
            .set_ex(CACHE_KEY, &payload, CACHE_TTL)
            .await
            .map_err(|source| publish_error(CACHE_KEY, source))?;

        tracing::debug!("📤 Published {} prices ({} bytes)", quotes.len(), payload.len());
        Ok(())
    }

    /// Subscribe to decoded batches on `channel`
    ///
    /// The backend subscription is active when this returns. When the backend
    /// stream ends (connection reset) the channel is resubscribed with
    /// exponential backoff. The stream ends only when `cancel` fires or the
    /// returned subscription is dropped.
    pub async fn subscribe(
        &self,
        channel: &str,
        cancel: CancellationToken,
    ) -> Result<PriceSubscription, PriceError> {
        let mut messages = self.backend.subscribe(channel).await?;
        let (queue, rx) = DropNewestQueue::bounded(SUBSCRIPTION_BUFFER);
        let counters = queue.counters();
        let channel = channel.to_string();
        let backend = Arc::clone(&self.backend);
        let reconnect = self.reconnect;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Subscription to '{}' cancelled", channel);
                        break;
                    }
                    _ = queue.closed() => {
                        tracing::debug!("Subscription to '{}' released by consumer", channel);
                        break;
                    }
                    message = messages.next() => {
                        let Some(payload) = message else {
                            tracing::warn!("⚠️ Backend stream for '{}' ended, resubscribing", channel);
                            match resubscribe(backend.as_ref(), &channel, reconnect, &cancel, &queue).await {
                                Some(stream) => {
                                    messages = stream;
                                    continue;
                                }
                                None => break,
                            }
                        };

                        let quotes = match serde_json::from_str::<Vec<PriceQuote>>(&payload) {
                            Ok(quotes) => quotes,
                            Err(e) => {
                                tracing::warn!("⚠️ Skipping undecodable message on '{}': {}", channel, e);
                                continue;
                            }
                        };

                        match queue.offer(quotes) {
                            Offer::Accepted => {}
                            Offer::Dropped => {
                                tracing::warn!(
                                    "⚠️ Subscriber on '{}' is full, dropped message ({} total)",
                                    channel,
                                    queue.dropped()
                                );
                            }
                            Offer::Closed => break,
                        }
                    }
                }
            }
        });

        Ok(PriceSubscription { rx, counters })
    }

    /// Start the background task that persists every batch seen on the
    /// persistence channel
    pub async fn spawn_persistence_subscriber(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, PriceError> {
        let mut subscription = self.subscribe(PERSISTENCE_CHANNEL, cancel).await?;
        let repository = Arc::clone(&self.repository);

        Ok(tokio::spawn(async move {
            tracing::info!("💾 Persistence subscriber started");

            while let Some(quotes) = subscription.recv().await {
                let count = quotes.len();
                let result = run_blocking(Arc::clone(&repository), move |repo| {
                    repo.upsert_batch(&quotes)
                })
                .await;

                match result {
                    Ok(summary) => tracing::debug!(
                        "💾 Persisted {} prices ({} inserted, {} updated)",
                        summary.total(),
                        summary.inserted,
                        summary.updated
                    ),
                    Err(e) => tracing::error!("❌ Failed to persist {} prices: {}", count, e),
                }
            }

            tracing::info!("💾 Persistence subscriber stopped");
        }))
    }

    /// Current batch from the canonical key, or from the durable store on a miss
    pub async fn get_gold_prices(&self) -> Result<Vec<PriceQuote>, PriceError> {
        if let Some(blob) = self.backend.get(CACHE_KEY).await? {
            return Ok(serde_json::from_str(&blob)?);
        }

        tracing::debug!("Cache miss on '{}', reading durable store", CACHE_KEY);
        let quotes = run_blocking(self.repository(), |repo| repo.find_all()).await?;

        if !quotes.is_empty() {
            if let Err(e) = self.write_cache(&quotes).await {
                tracing::warn!("⚠️ Failed to repopulate '{}': {}", CACHE_KEY, e);
            }
        }

        Ok(quotes)
    }

    /// Durable-store lookup by id or type
    pub async fn find_by_key(&self, key: &str) -> Result<Option<PriceQuote>, PriceError> {
        let key = key.to_string();
        Ok(run_blocking(self.repository(), move |repo| repo.find_by_key(&key)).await?)
    }

    pub async fn ping(&self) -> Result<(), PriceError> {
        Ok(self.backend.ping().await?)
    }

    async fn write_cache(&self, quotes: &[PriceQuote]) -> Result<(), PriceError> {
        let payload = serde_json::to_string(quotes)?;
        self.backend.set_ex(CACHE_KEY, &payload, CACHE_TTL).await?;
        Ok(())
    }
}

/// Re-establish a channel subscription, backing off between attempts
///
/// Returns `None` when `cancel` fires or the consumer goes away first.
async fn resubscribe(
    backend: &dyn PubSubBackend,
    channel: &str,
    reconnect: ReconnectPolicy,
    cancel: &CancellationToken,
    queue: &DropNewestQueue<Vec<PriceQuote>>,
) -> Option<MessageStream> {
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        let delay = reconnect.delay(attempt);

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = queue.closed() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match backend.subscribe(channel).await {
            Ok(stream) => {
                tracing::info!("🔁 Resubscribed to '{}' after {} attempt(s)", channel, attempt);
                return Some(stream);
            }
            Err(e) => tracing::warn!(
                "⚠️ Resubscribe to '{}' failed (attempt {}), retrying in {:?}: {}",
                channel,
                attempt,
                reconnect.delay(attempt.saturating_add(1)),
                e
            ),
        }
    }
}

fn publish_error(target: &str, source: BackendError) -> PriceError {
    PriceError::Publish {
        target: target.to_string(),
        source,
    }
}

/// Decoded batches from one channel subscription
pub struct PriceSubscription {
    rx: mpsc::Receiver<Vec<PriceQuote>>,
    counters: Arc<QueueCounters>,
}

impl PriceSubscription {
    /// Next batch, or `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<Vec<PriceQuote>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Vec<PriceQuote>> {
        self.rx.try_recv().ok()
    }

    /// Batches discarded because this subscriber's buffer was full
    pub fn dropped(&self) -> u64 {
        self.counters.dropped()
    }
}

impl Stream for PriceSubscription {
    type Item = Vec<PriceQuote>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
