/// Price distribution
///
/// The PriceDistributor fetches candidate batches, detects changes against the
/// last published batch and pushes changes through the cache and pub/sub store.

pub mod change;
pub mod price_distributor;

pub use change::have_prices_changed;
pub use price_distributor::{
    DistributorSnapshot, InitialLoad, PriceDistributor, UpdateOutcome, FETCH_TIMEOUT,
};
