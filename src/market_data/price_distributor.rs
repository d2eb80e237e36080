use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::change::have_prices_changed;
use crate::database::run_blocking;
use crate::error::PriceError;
use crate::fetcher::PriceFetcher;
use crate::models::{validate_batch, PriceQuote};
use crate::store::{PubSubStore, TieredCache};

/// Upper bound on one upstream fetch
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one fetch-compare-publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new batch was cached and published
    Changed { count: usize },
    /// Fetched batch equals the last published one
    Unchanged,
    /// Fetcher returned nothing
    Empty,
}

impl UpdateOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, UpdateOutcome::Changed { .. })
    }
}

/// Where manual-mode startup data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialLoad {
    /// Loaded from the durable store without publishing
    FromStore(usize),
    /// Fetched and published
    FromFetcher(usize),
    /// Neither source had data
    Empty,
}

/// Copy of the distributor's last published batch
#[derive(Debug, Clone, Default)]
pub struct DistributorSnapshot {
    pub prices: Vec<PriceQuote>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Orchestrates fetch, change detection and publish
///
/// Holds the authoritative last-known batch. Every write path takes the
/// `published` lock exclusively for the whole cycle, so at most one update is
/// in flight. Readers go through the cache and are not serialized against
/// writers; `last_update` sits behind its own lock for the same reason.
pub struct PriceDistributor {
    cache: Arc<TieredCache>,
    store: Arc<PubSubStore>,
    fetcher: Arc<dyn PriceFetcher>,
    published: RwLock<Vec<PriceQuote>>,
    last_update: parking_lot::RwLock<Option<DateTime<Utc>>>,
    fetch_timeout: Duration,
}

impl PriceDistributor {
    pub fn new(cache: Arc<TieredCache>, store: Arc<PubSubStore>, fetcher: Arc<dyn PriceFetcher>) -> Self {
        tracing::info!("📈 PriceDistributor created (fetcher: {})", fetcher.name());

        Self {
            cache,
            store,
            fetcher,
            published: RwLock::new(Vec::new()),
            last_update: parking_lot::RwLock::new(None),
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Fetch a candidate batch and publish it if it differs from the last one
    ///
    /// The cache is written before publishing. A publish failure is returned
    /// with the cache already holding the new batch and the snapshot left at
    /// the previous one; the next successful update reconciles them.
    pub async fn update_prices(&self) -> Result<UpdateOutcome, PriceError> {
        let mut published = self.published.write().await;

        let quotes = self.fetch().await?;
        if quotes.is_empty() {
            return Ok(UpdateOutcome::Empty);
        }

        if !have_prices_changed(&published, &quotes) {
            return Ok(UpdateOutcome::Unchanged);
        }

        self.apply(&mut published, quotes).await
    }

    /// Run `update_prices` every `interval` until `cancel` fires
    pub fn start_auto_update(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!("🔄 Auto update started (every {:?})", interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.update_prices().await {
                    Ok(UpdateOutcome::Changed { count }) => {
                        tracing::info!(
                            "✅ Gold prices updated at {} ({} items)",
                            Utc::now().format("%H:%M:%S"),
                            count
                        );
                    }
                    Ok(_) => match self.last_update() {
                        Some(last) => tracing::debug!(
                            "No changes in gold prices for {} seconds",
                            (Utc::now() - last).num_seconds()
                        ),
                        None => tracing::debug!("No gold prices published yet"),
                    },
                    Err(e) if e.is_transient() => {
                        tracing::warn!("⚠️ Failed to update prices, retrying next tick: {}", e)
                    }
                    Err(e) => tracing::error!("❌ Failed to update prices: {}", e),
                }
            }

            tracing::info!("🔄 Auto update stopped");
        })
    }

    /// Manual-mode startup load
    ///
    /// Durable-store data wins and is cached without publishing. When the
    /// store is empty or unreadable, one fetch is cached and published.
    pub async fn fetch_initial_data(&self) -> Result<InitialLoad, PriceError> {
        let mut published = self.published.write().await;

        match run_blocking(self.store.repository(), |repo| repo.find_all()).await {
            Ok(stored) if !stored.is_empty() => {
                let count = stored.len();
                self.cache.set(&stored);
                *published = stored;
                *self.last_update.write() = Some(Utc::now());

                tracing::info!("📦 Initial data loaded from database ({} items)", count);
                return Ok(InitialLoad::FromStore(count));
            }
            Ok(_) => tracing::info!("Database is empty, fetching initial data"),
            Err(e) => tracing::warn!("⚠️ Could not read database, fetching initial data: {}", e),
        }

        let quotes = self.fetch().await?;
        if quotes.is_empty() {
            tracing::warn!("⚠️ No initial data available");
            return Ok(InitialLoad::Empty);
        }

        let count = quotes.len();
        self.apply(&mut published, quotes).await?;

        tracing::info!("📦 Initial data loaded from {} ({} items)", self.fetcher.name(), count);
        Ok(InitialLoad::FromFetcher(count))
    }

    /// Publish a caller-supplied batch unconditionally
    ///
    /// Quotes without `updated_at` are stamped with the current time.
    pub async fn add_prices_manually(&self, mut quotes: Vec<PriceQuote>) -> Result<usize, PriceError> {
        validate_batch(&quotes)?;

        let now = Utc::now();
        for quote in quotes.iter_mut().filter(|q| q.updated_at.is_none()) {
            quote.updated_at = Some(now);
        }

        let mut published = self.published.write().await;
        let count = quotes.len();
        self.apply(&mut published, quotes).await?;

        tracing::info!("✍️ {} prices added manually", count);
        Ok(count)
    }

    pub async fn get_latest_prices(&self) -> Result<Vec<PriceQuote>, PriceError> {
        self.cache.get().await
    }

    /// Quote whose `id` or `type` equals `key`, from the cache or the durable store
    pub async fn get_price_by_id(&self, key: &str) -> Result<Option<PriceQuote>, PriceError> {
        match self.cache.get().await {
            Ok(quotes) => {
                if let Some(quote) = quotes.into_iter().find(|q| q.matches_key(key)) {
                    return Ok(Some(quote));
                }
            }
            Err(e) => tracing::debug!("Cache read failed for '{}', trying database: {}", key, e),
        }

        self.store.find_by_key(key).await
    }

    /// Time of the last published batch; never waits for an in-flight update
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }

    pub async fn snapshot(&self) -> DistributorSnapshot {
        let prices = self.published.read().await.clone();
        DistributorSnapshot {
            prices,
            last_update: self.last_update(),
        }
    }

    async fn fetch(&self) -> Result<Vec<PriceQuote>, PriceError> {
        tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch())
            .await
            .map_err(|_| PriceError::FetchTimeout(self.fetch_timeout))?
    }

    async fn apply(
        &self,
        published: &mut Vec<PriceQuote>,
        quotes: Vec<PriceQuote>,
    ) -> Result<UpdateOutcome, PriceError> {
        self.cache.set(&quotes);
        self.store.publish(&quotes).await?;

        let count = quotes.len();
        *published = quotes;
        *self.last_update.write() = Some(Utc::now());

        Ok(UpdateOutcome::Changed { count })
    }
}
