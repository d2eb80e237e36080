//! End-to-end runs of the price pipeline on the in-process backend:
//! fetcher -> distributor -> pub/sub store -> hub -> connected clients,
//! plus the persistence channel into the durable store.

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::{DateTime, TimeZone, Utc};
use gold_price_server::database::{InMemoryPriceRepository, PriceRepository};
use gold_price_server::error::PriceError;
use gold_price_server::fetcher::PriceFetcher;
use gold_price_server::market_data::{InitialLoad, PriceDistributor, UpdateOutcome};
use gold_price_server::models::{ManualAddRequest, PriceQuote};
use gold_price_server::store::{MemoryBackend, PubSubStore, TieredCache};
use gold_price_server::websocket::{ClientSink, ConnectionHub, SinkError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

/// Fetcher handing out queued batches, then empty ones
#[derive(Default)]
struct QueuedFetcher {
    batches: Mutex<VecDeque<Vec<PriceQuote>>>,
}

impl QueuedFetcher {
    fn push(&self, batch: Vec<PriceQuote>) {
        self.batches.lock().push_back(batch);
    }
}

#[async_trait]
impl PriceFetcher for QueuedFetcher {
    async fn fetch(&self) -> Result<Vec<PriceQuote>, PriceError> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "queued"
    }
}

/// Fetcher that parks inside `fetch` until the test releases it
struct GatedFetcher {
    batch: Vec<PriceQuote>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PriceFetcher for GatedFetcher {
    async fn fetch(&self) -> Result<Vec<PriceQuote>, PriceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.batch.clone())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Client sink keeping every frame it was sent
#[derive(Default)]
struct RecordingClient {
    frames: Mutex<Vec<String>>,
}

impl RecordingClient {
    fn events(&self) -> Vec<Vec<PriceQuote>> {
        self.frames
            .lock()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }
}

#[async_trait]
impl ClientSink for RecordingClient {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), SinkError> {
        self.frames.lock().push(payload.to_string());
        Ok(())
    }

    async fn close(&self) {}
}

struct Pipeline {
    fetcher: Arc<QueuedFetcher>,
    repository: Arc<InMemoryPriceRepository>,
    store: Arc<PubSubStore>,
    distributor: Arc<PriceDistributor>,
    hub: Arc<ConnectionHub>,
    shutdown: CancellationToken,
}

impl Pipeline {
    async fn start() -> Self {
        let shutdown = CancellationToken::new();
        let repository = Arc::new(InMemoryPriceRepository::new());
        let store = Arc::new(PubSubStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::clone(&repository) as Arc<dyn PriceRepository>,
        ));
        store
            .spawn_persistence_subscriber(shutdown.clone())
            .await
            .unwrap();

        let fetcher = Arc::new(QueuedFetcher::default());
        let cache = Arc::new(TieredCache::new(Arc::clone(&store)));
        let distributor = Arc::new(PriceDistributor::new(
            cache,
            Arc::clone(&store),
            Arc::clone(&fetcher) as Arc<dyn PriceFetcher>,
        ));

        let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), shutdown.clone()));
        hub.start().await.unwrap();

        Self {
            fetcher,
            repository,
            store,
            distributor,
            hub,
            shutdown,
        }
    }

    /// Connect a recording client; keep the sender alive to keep it connected
    async fn connect(&self) -> (Arc<RecordingClient>, mpsc::Sender<Result<Message, String>>) {
        let client = Arc::new(RecordingClient::default());
        let (tx, rx) = mpsc::channel(4);

        let hub = Arc::clone(&self.hub);
        let sink = Arc::clone(&client) as Arc<dyn ClientSink>;
        tokio::spawn(async move {
            hub.serve(sink, ReceiverStream::new(rx)).await;
        });

        let before = self.hub.registry().len();
        wait_until(|| self.hub.registry().len() > before).await;
        (client, tx)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap()
}

fn gold_1(buy: Decimal) -> Vec<PriceQuote> {
    vec![PriceQuote::new("gold_1", "SJC")
        .with_id("1")
        .with_prices(buy, dec!(110))
        .with_updated_at(t1())]
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

#[tokio::test]
async fn test_changes_fan_out_exactly_once() {
    let pipeline = Pipeline::start().await;
    let (client, _keep_open) = pipeline.connect().await;

    // First batch is a change and reaches the client
    pipeline.fetcher.push(gold_1(dec!(100)));
    let outcome = pipeline.distributor.update_prices().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Changed { count: 1 });

    wait_until(|| client.events().len() == 1).await;
    assert_eq!(client.events()[0], gold_1(dec!(100)));

    // Identical batch is not republished
    pipeline.fetcher.push(gold_1(dec!(100)));
    let outcome = pipeline.distributor.update_prices().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Unchanged);

    tokio::time::sleep(QUIET).await;
    assert_eq!(client.events().len(), 1);

    // A single field change is one more event
    pipeline.fetcher.push(gold_1(dec!(101)));
    let outcome = pipeline.distributor.update_prices().await.unwrap();
    assert!(outcome.is_changed());

    wait_until(|| client.events().len() == 2).await;
    assert_eq!(client.events()[1], gold_1(dec!(101)));

    tokio::time::sleep(QUIET).await;
    assert_eq!(client.events().len(), 2);
}

#[tokio::test]
async fn test_manual_add_without_type_never_reaches_readers() {
    let pipeline = Pipeline::start().await;
    let (client, _keep_open) = pipeline.connect().await;

    let request: ManualAddRequest =
        serde_json::from_str(r#"{"name":"No type","buy_price":100}"#).unwrap();
    let result = request.into_quotes();
    assert!(matches!(result, Err(PriceError::Validation(_))));

    // The distributor rejects the same batch if it gets past parsing
    let untyped = vec![PriceQuote::new("", "No type")];
    let err = pipeline.distributor.add_prices_manually(untyped).await.unwrap_err();
    assert!(err.is_validation_error());

    tokio::time::sleep(QUIET).await;
    assert!(client.events().is_empty());
    assert!(pipeline.distributor.get_latest_prices().await.unwrap().is_empty());
    assert!(pipeline.repository.is_empty());
}

#[tokio::test]
async fn test_manual_initial_load_reaches_durable_store() {
    let pipeline = Pipeline::start().await;

    let batch = vec![
        PriceQuote::new("gold_1", "SJC").with_id("1").with_prices(dec!(100), dec!(110)),
        PriceQuote::new("gold_2", "DOJI").with_id("2").with_prices(dec!(98), dec!(108)),
    ];
    pipeline.fetcher.push(batch.clone());

    let load = pipeline.distributor.fetch_initial_data().await.unwrap();
    assert_eq!(load, InitialLoad::FromFetcher(2));
    assert_eq!(pipeline.distributor.get_latest_prices().await.unwrap(), batch);

    let repository = Arc::clone(&pipeline.repository);
    wait_until(|| repository.len() == 2).await;

    let mut stored = pipeline.repository.find_all().unwrap();
    stored.sort_by(|a, b| a.quote_type.cmp(&b.quote_type));
    let stored: Vec<_> = stored
        .iter()
        .map(|q| (q.quote_type.as_str(), q.buy_price, q.sell_price))
        .collect();
    assert_eq!(
        stored,
        vec![("gold_1", dec!(100), dec!(110)), ("gold_2", dec!(98), dec!(108))]
    );
}

#[tokio::test]
async fn test_new_client_receives_snapshot_of_published_batch() {
    let pipeline = Pipeline::start().await;

    pipeline.fetcher.push(gold_1(dec!(100)));
    pipeline.distributor.update_prices().await.unwrap();

    let (client, _keep_open) = pipeline.connect().await;
    wait_until(|| !client.events().is_empty()).await;
    assert_eq!(client.events()[0], gold_1(dec!(100)));
}

#[tokio::test]
async fn test_every_reader_sees_the_published_batch() {
    let pipeline = Pipeline::start().await;

    let batch = vec![PriceQuote::new("gold_3", "BTMC")
        .with_id("3")
        .with_prices(dec!(120), dec!(125))
        .with_updated_at(t1())];
    let count = pipeline.distributor.add_prices_manually(batch.clone()).await.unwrap();
    assert_eq!(count, 1);

    // Cache, canonical key and the lookup path agree
    assert_eq!(pipeline.distributor.get_latest_prices().await.unwrap(), batch);
    assert_eq!(pipeline.store.get_gold_prices().await.unwrap(), batch);

    let by_id = pipeline.distributor.get_price_by_id("3").await.unwrap();
    let by_type = pipeline.distributor.get_price_by_id("gold_3").await.unwrap();
    assert_eq!(by_id, Some(batch[0].clone()));
    assert_eq!(by_type, Some(batch[0].clone()));
    assert!(pipeline.distributor.get_price_by_id("gold_9").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_see_old_batch_while_update_is_in_flight() {
    let store = Arc::new(PubSubStore::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(InMemoryPriceRepository::new()),
    ));
    let fetcher = Arc::new(GatedFetcher {
        batch: gold_1(dec!(101)),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let distributor = Arc::new(PriceDistributor::new(
        Arc::new(TieredCache::new(Arc::clone(&store))),
        Arc::clone(&store),
        Arc::clone(&fetcher) as Arc<dyn PriceFetcher>,
    ));

    distributor.add_prices_manually(gold_1(dec!(100))).await.unwrap();

    let writer = tokio::spawn({
        let distributor = Arc::clone(&distributor);
        async move { distributor.update_prices().await }
    });
    fetcher.entered.notified().await;

    // The writer holds the update lock; readers neither wait nor see a partial batch
    let during = tokio::time::timeout(QUIET, distributor.get_latest_prices())
        .await
        .expect("reader waited for the writer")
        .unwrap();
    assert_eq!(during, gold_1(dec!(100)));
    assert_eq!(store.get_gold_prices().await.unwrap(), gold_1(dec!(100)));

    fetcher.release.notify_one();
    assert!(writer.await.unwrap().unwrap().is_changed());

    // Eventually every tier agrees on the new batch
    assert_eq!(distributor.get_latest_prices().await.unwrap(), gold_1(dec!(101)));
    assert_eq!(store.get_gold_prices().await.unwrap(), gold_1(dec!(101)));
}

#[tokio::test]
async fn test_disconnected_client_is_deregistered() {
    let pipeline = Pipeline::start().await;
    let (_client, keep_open) = pipeline.connect().await;
    assert_eq!(pipeline.hub.registry().len(), 1);

    keep_open.send(Ok(Message::Close(None))).await.unwrap();
    wait_until(|| pipeline.hub.registry().is_empty()).await;
}
