//! Error types for the price distribution pipeline
//!
//! Lookup misses are not errors: read paths return `Option` and callers map
//! `None` to a not-found response.

use std::time::Duration;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::store::BackendError;

/// Errors raised while fetching, validating, publishing or reading prices
///
/// # Error Categories
///
/// - **Upstream**: `Fetch`, `FetchTimeout` (non-fatal, retried next cycle)
/// - **Validation**: `Validation`, `EmptyBatch` (rejected before the pipeline)
/// - **Distribution**: `Publish`, `Backend` (surfaced to the update caller)
/// - **Data**: `Decode`, `Database`
#[derive(Debug, Error)]
pub enum PriceError {
    /// Upstream price source failed or returned an unusable payload
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Upstream price source did not answer in time
    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    /// Manually supplied prices are missing required fields
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Publishing requires at least one quote
    #[error("Cannot publish an empty price batch")]
    EmptyBatch,

    /// Pub/sub backend rejected a publish or cache write
    #[error("Publish to '{target}' failed: {source}")]
    Publish {
        target: String,
        #[source]
        source: BackendError,
    },

    /// Payload could not be encoded or decoded as a price batch
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Pub/sub backend error outside of publishing
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Durable store error
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PriceError {
    /// Returns true if the error was caused by caller-supplied data
    pub fn is_validation_error(&self) -> bool {
        matches!(self, PriceError::Validation(_) | PriceError::EmptyBatch)
    }

    /// Returns true if retrying on the next cycle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PriceError::Fetch(_)
                | PriceError::FetchTimeout(_)
                | PriceError::Publish { .. }
                | PriceError::Backend(_)
        )
    }
}
