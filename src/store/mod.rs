//! Pub/sub store and caches
//!
//! Layers, fastest first:
//! - [`TieredCache`]: single in-process slot
//! - [`PubSubStore`]: canonical TTL key plus live-update and persistence channels
//! - durable store behind [`PriceRepository`](crate::database::PriceRepository)

pub mod backend;
pub mod memory_backend;
pub mod pubsub_store;
pub mod queue;
pub mod reconnect;
pub mod redis_backend;
pub mod tiered_cache;

pub use backend::{BackendError, MessageStream, PubSubBackend};
pub use memory_backend::MemoryBackend;
pub use pubsub_store::{
    PriceSubscription, PubSubStore, CACHE_KEY, CACHE_TTL, LIVE_UPDATE_CHANNEL, PERSISTENCE_CHANNEL,
    SUBSCRIPTION_BUFFER,
};
pub use queue::{DropNewestQueue, Offer, QueueCounters, QueueStats};
pub use reconnect::ReconnectPolicy;
pub use redis_backend::RedisBackend;
pub use tiered_cache::TieredCache;
