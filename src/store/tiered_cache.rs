use parking_lot::RwLock;
use std::sync::Arc;

use super::pubsub_store::PubSubStore;
use crate::error::PriceError;
use crate::models::PriceQuote;

/// Single-slot, write-through memory cache in front of the [`PubSubStore`]
///
/// Readers always receive their own copy of the slot. There is no eviction;
/// expiry lives in the store's TTL key.
pub struct TieredCache {
    slot: RwLock<Vec<PriceQuote>>,
    store: Arc<PubSubStore>,
}

impl TieredCache {
    pub fn new(store: Arc<PubSubStore>) -> Self {
        Self {
            slot: RwLock::new(Vec::new()),
            store,
        }
    }

    /// Current batch from memory, falling back to the store
    pub async fn get(&self) -> Result<Vec<PriceQuote>, PriceError> {
        if let Some(quotes) = self.cached() {
            return Ok(quotes);
        }

        let quotes = self.store.get_gold_prices().await?;
        if !quotes.is_empty() {
            self.set(&quotes);
        }
        Ok(quotes)
    }

    /// Copy of the memory slot, `None` when it is empty
    pub fn cached(&self) -> Option<Vec<PriceQuote>> {
        let slot = self.slot.read();
        (!slot.is_empty()).then(|| slot.clone())
    }

    pub fn set(&self, quotes: &[PriceQuote]) {
        *self.slot.write() = quotes.to_vec();
    }
}
