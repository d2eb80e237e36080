// Library Crate Root
// lib.rs

// main.rs and the integration tests import through lib.rs like an external crate
pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod fetcher;
pub mod market_data;
pub mod models;
pub mod store;
pub mod websocket;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use config::{AppConfig, ServerMode};
pub use error::PriceError;
pub use market_data::PriceDistributor;
pub use models::PriceQuote;
pub use store::{PubSubStore, TieredCache};
pub use websocket::ConnectionHub;
