/// Repository implementations for the durable price store
///
/// - **PriceRepositoryImpl**: PostgreSQL via Diesel and r2d2
/// - **InMemoryPriceRepository**: process-local store with the same contract

pub mod memory;
pub mod price_repository;

pub use memory::InMemoryPriceRepository;
pub use price_repository::{run_blocking, PriceRepository, PriceRepositoryImpl, UpsertSummary};
