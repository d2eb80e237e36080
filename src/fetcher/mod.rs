//! Upstream price sources
//!
//! - **BtmcFetcher**: BTMC public price API over HTTP
//! - **SampleFetcher**: built-in reference quotes for offline runs

pub mod btmc;
pub mod sample;

use async_trait::async_trait;

use crate::error::PriceError;
use crate::models::PriceQuote;

pub use btmc::{parse_btmc_payload, BtmcFetcher};
pub use sample::{sample_quotes, SampleFetcher};

/// Source of candidate price batches
///
/// Implementations do not apply their own deadline; the distributor bounds
/// every call.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<PriceQuote>, PriceError>;

    /// Short label used in logs
    fn name(&self) -> &str;
}
