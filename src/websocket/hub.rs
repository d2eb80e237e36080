use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::connection::{ClientSink, ConnectionId, ConnectionState, WsClientSink};
use crate::error::PriceError;
use crate::store::{
    DropNewestQueue, Offer, PriceSubscription, PubSubStore, QueueStats, LIVE_UPDATE_CHANNEL,
};

/// Serialized batches waiting for fan-out
pub const BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Bound on reading and sending the current batch to a new connection
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Set of live connections keyed by a per-connection id
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<dyn ClientSink>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn ClientSink>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.insert(id, sink);
        id
    }

    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<dyn ClientSink>> {
        self.connections.remove(&id).map(|(_, sink)| sink)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handles of every registered connection at this instant
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn ClientSink>)> {
        self.connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }
}

/// Statistics for the connection hub
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HubStats {
    /// Currently registered connections
    pub connections: usize,
    /// Broadcast queue counters
    pub broadcast_queue: QueueStats,
    /// Successful per-connection writes (lifetime)
    pub delivered: u64,
    /// Writes that failed and closed their connection (lifetime)
    pub failed_writes: u64,
}

/// Registry of streaming connections and the fan-out engine feeding them
///
/// A forwarder task turns live-update batches into JSON and offers them to a
/// bounded broadcast queue; the broadcast loop drains it and writes each
/// message to every registered connection from its own task, so a slow or
/// broken client never holds up the others.
pub struct ConnectionHub {
    registry: Arc<ConnectionRegistry>,
    store: Arc<PubSubStore>,
    queue: DropNewestQueue<Arc<str>>,
    /// Receiver for queued broadcasts (taken when start() is called)
    queue_rx: Mutex<Option<mpsc::Receiver<Arc<str>>>>,
    shutdown: CancellationToken,
    delivered: Arc<AtomicU64>,
    failed_writes: Arc<AtomicU64>,
}

impl ConnectionHub {
    pub fn new(store: Arc<PubSubStore>, shutdown: CancellationToken) -> Self {
        let (queue, queue_rx) = DropNewestQueue::bounded(BROADCAST_QUEUE_CAPACITY);

        tracing::info!("📡 ConnectionHub created");

        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            store,
            queue,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown,
            delivered: Arc::new(AtomicU64::new(0)),
            failed_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscribe to live updates and spawn the forwarder and broadcast loop
    ///
    /// Only the first call starts anything.
    pub async fn start(self: &Arc<Self>) -> Result<(), PriceError> {
        let Some(queue_rx) = self.queue_rx.lock().take() else {
            tracing::warn!("📡 ConnectionHub already started");
            return Ok(());
        };

        let subscription = self
            .store
            .subscribe(LIVE_UPDATE_CHANNEL, self.shutdown.clone())
            .await?;

        tokio::spawn(Arc::clone(self).run_forwarder(subscription));
        tokio::spawn(Arc::clone(self).run_broadcast_loop(queue_rx));

        tracing::info!("📡 ConnectionHub started");
        Ok(())
    }

    /// Offer a serialized batch for fan-out without waiting
    pub fn broadcast(&self, payload: impl Into<Arc<str>>) -> Offer {
        let offer = self.queue.offer(payload.into());
        if offer == Offer::Dropped {
            tracing::warn!(
                "⚠️ Broadcast queue full, dropped update ({} total)",
                self.queue.dropped()
            );
        }
        offer
    }

    /// Write `payload` to every registered connection, one task per write
    ///
    /// Returns the number of connections targeted.
    pub fn fan_out(&self, payload: Arc<str>) -> usize {
        let targets = self.registry.snapshot();
        let count = targets.len();

        for (id, sink) in targets {
            let payload = Arc::clone(&payload);
            let registry = Arc::clone(&self.registry);
            let delivered = Arc::clone(&self.delivered);
            let failed_writes = Arc::clone(&self.failed_writes);

            tokio::spawn(async move {
                match sink.send_text(payload).await {
                    Ok(()) => {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!("🔌 Write to client {} failed, closing: {}", id, e);
                        failed_writes.fetch_add(1, Ordering::Relaxed);
                        registry.deregister(id);
                        sink.close().await;
                    }
                }
            });
        }

        count
    }

    /// Handle an upgraded WebSocket until it closes
    pub async fn accept(self: Arc<Self>, socket: WebSocket) {
        let (sink, inbound) = socket.split();
        self.serve(Arc::new(WsClientSink::new(sink)), inbound).await;
    }

    /// Register `sink`, send it the current batch, then watch `inbound` for
    /// disconnect
    ///
    /// Inbound payloads are ignored; pings are answered by the transport.
    pub async fn serve<S, E>(&self, sink: Arc<dyn ClientSink>, mut inbound: S)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let mut state = ConnectionState::Connecting;
        let id = self.registry.register(Arc::clone(&sink));
        state = state.advance(ConnectionState::Open);

        tracing::info!("🔌 Client {} connected ({} open)", id, self.registry.len());

        self.send_snapshot(id, sink.as_ref()).await;

        while state.is_open() {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    state = state.advance(ConnectionState::Closing);
                }
                frame = inbound.next() => match frame {
                    Some(Ok(Message::Close(_))) | None => {
                        state = state.advance(ConnectionState::Closing);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Client {} read error: {}", id, e);
                        state = state.advance(ConnectionState::Closing);
                    }
                }
            }
        }

        self.registry.deregister(id);
        sink.close().await;
        state = state.advance(ConnectionState::Closed);

        tracing::info!(
            "🔌 Client {} {:?} ({} open)",
            id,
            state,
            self.registry.len()
        );
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            broadcast_queue: self.queue.stats(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
        }
    }

    async fn run_forwarder(self: Arc<Self>, mut subscription: PriceSubscription) {
        tracing::info!("📡 Live-update forwarder started");

        while let Some(quotes) = subscription.recv().await {
            match serde_json::to_string(&quotes) {
                Ok(payload) => {
                    self.broadcast(payload);
                }
                Err(e) => tracing::error!("❌ Failed to serialize live update: {}", e),
            }
        }

        tracing::info!("📡 Live-update forwarder stopped");
    }

    async fn run_broadcast_loop(self: Arc<Self>, mut queue_rx: mpsc::Receiver<Arc<str>>) {
        tracing::info!("📡 Broadcast loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = queue_rx.recv() => match message {
                    Some(payload) => {
                        let targets = self.fan_out(payload);
                        tracing::debug!("📡 Broadcast to {} clients", targets);
                    }
                    None => break,
                },
            }
        }

        tracing::info!("📡 Broadcast loop stopped");
    }

    async fn send_snapshot(&self, id: ConnectionId, sink: &dyn ClientSink) {
        let send = async {
            let quotes = match self.store.get_gold_prices().await {
                Ok(quotes) if !quotes.is_empty() => quotes,
                Ok(_) => return,
                Err(e) => {
                    tracing::debug!("No snapshot for client {}: {}", id, e);
                    return;
                }
            };

            let payload = match serde_json::to_string(&quotes) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("❌ Failed to serialize snapshot: {}", e);
                    return;
                }
            };

            if let Err(e) = sink.send_text(payload.into()).await {
                tracing::debug!("Snapshot to client {} failed: {}", id, e);
            }
        };

        if tokio::time::timeout(SNAPSHOT_TIMEOUT, send).await.is_err() {
            tracing::debug!("Snapshot to client {} timed out", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryPriceRepository;
    use crate::models::PriceQuote;
    use crate::store::MemoryBackend;
    use crate::websocket::connection::SinkError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio_stream::wrappers::ReceiverStream;

    const WAIT: Duration = Duration::from_secs(2);

    /// Sink recording every frame, optionally failing every write
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        fail: bool,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn healthy() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Self::default()
            })
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn send_text(&self, payload: Arc<str>) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Transport("broken pipe".to_string()));
            }
            self.frames.lock().push(payload.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn hub_with(repository: InMemoryPriceRepository) -> (Arc<ConnectionHub>, Arc<PubSubStore>) {
        let store = Arc::new(PubSubStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(repository),
        ));
        let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), CancellationToken::new()));
        (hub, store)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_registry_register_and_deregister() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(RecordingSink::healthy());
        let b = registry.register(RecordingSink::healthy());

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.deregister(a).is_some());
        assert!(registry.deregister(a).is_none());
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
    }

    #[tokio::test]
    async fn test_failed_write_removes_only_that_connection() {
        let (hub, _store) = hub_with(InMemoryPriceRepository::new());
        let first = RecordingSink::healthy();
        let broken = RecordingSink::broken();
        let second = RecordingSink::healthy();

        hub.registry().register(first.clone());
        let broken_id = hub.registry().register(broken.clone());
        hub.registry().register(second.clone());

        assert_eq!(hub.fan_out(Arc::from("[1]")), 3);

        wait_until(|| {
            first.frames().len() == 1 && second.frames().len() == 1 && broken.is_closed()
        })
        .await;

        assert!(!hub.registry().contains(broken_id));
        assert_eq!(hub.registry().len(), 2);
        assert!(!first.is_closed());

        let stats = hub.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed_writes, 1);
    }

    #[tokio::test]
    async fn test_broadcast_queue_drops_newest_when_full() {
        let (hub, _store) = hub_with(InMemoryPriceRepository::new());

        for i in 0..BROADCAST_QUEUE_CAPACITY {
            assert_eq!(hub.broadcast(format!("[{i}]")), Offer::Accepted);
        }
        assert_eq!(hub.broadcast("[overflow]"), Offer::Dropped);
        assert_eq!(hub.stats().broadcast_queue.dropped, 1);
    }

    #[tokio::test]
    async fn test_published_batch_reaches_registered_connections() {
        let (hub, store) = hub_with(InMemoryPriceRepository::new());
        hub.start().await.unwrap();

        let sink = RecordingSink::healthy();
        hub.registry().register(sink.clone());

        let batch = vec![PriceQuote::new("gold_1", "SJC")];
        store.publish(&batch).await.unwrap();

        wait_until(|| sink.frames().len() == 1).await;
        let received: Vec<PriceQuote> = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert_eq!(received, batch);
    }

    #[tokio::test]
    async fn test_second_start_is_a_no_op() {
        let (hub, _store) = hub_with(InMemoryPriceRepository::new());
        hub.start().await.unwrap();
        hub.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_sends_snapshot_and_deregisters_on_close() {
        let (hub, _store) = hub_with(InMemoryPriceRepository::with_quotes(&[PriceQuote::new(
            "gold_1", "SJC",
        )]));
        let sink = RecordingSink::healthy();
        let (tx, rx) = mpsc::channel::<Result<Message, axum::Error>>(4);

        let task = {
            let hub = Arc::clone(&hub);
            let sink: Arc<dyn ClientSink> = sink.clone();
            tokio::spawn(async move { hub.serve(sink, ReceiverStream::new(rx)).await })
        };

        wait_until(|| hub.registry().len() == 1 && sink.frames().len() == 1).await;
        let snapshot: Vec<PriceQuote> = serde_json::from_str(&sink.frames()[0]).unwrap();
        assert_eq!(snapshot[0].quote_type, "gold_1");

        // Inbound payloads are ignored
        tx.send(Ok(Message::Text("hello".to_string()))).await.unwrap();
        tx.send(Ok(Message::Close(None))).await.unwrap();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(hub.registry().is_empty());
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_serve_without_data_sends_nothing() {
        let (hub, _store) = hub_with(InMemoryPriceRepository::new());
        let sink = RecordingSink::healthy();
        let (tx, rx) = mpsc::channel::<Result<Message, axum::Error>>(1);
        drop(tx);

        hub.serve(sink.clone(), ReceiverStream::new(rx)).await;

        assert!(sink.frames().is_empty());
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_connections() {
        let store = Arc::new(PubSubStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(InMemoryPriceRepository::new()),
        ));
        let shutdown = CancellationToken::new();
        let hub = Arc::new(ConnectionHub::new(store, shutdown.clone()));
        let sink = RecordingSink::healthy();
        let (_tx, rx) = mpsc::channel::<Result<Message, axum::Error>>(1);

        let task = {
            let hub = Arc::clone(&hub);
            let sink: Arc<dyn ClientSink> = sink.clone();
            tokio::spawn(async move { hub.serve(sink, ReceiverStream::new(rx)).await })
        };
        wait_until(|| hub.registry().len() == 1).await;

        shutdown.cancel();

        // The inbound stream is still open, so only shutdown closes the sink
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(hub.registry().is_empty());
        assert!(sink.is_closed());
    }
}
