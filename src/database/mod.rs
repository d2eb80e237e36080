/// Durable store for published price batches
///
/// This module provides:
/// - PostgreSQL connection pooling with embedded migrations
/// - The `PriceRepository` contract with a Diesel implementation and an
///   in-memory implementation for database-less runs and tests

pub mod connection;
pub mod models;
pub mod repositories;
pub mod schema;

pub use connection::{establish_connection_pool, DatabaseError, DatabasePool};
pub use repositories::{
    run_blocking, InMemoryPriceRepository, PriceRepository, PriceRepositoryImpl, UpsertSummary,
};
