pub mod connection;
pub mod handler;
pub mod hub;

pub use connection::{ClientSink, ConnectionId, ConnectionState, SinkError, WsClientSink};
pub use handler::{socket_io_discovery, websocket_handler, DiscoveryResponse, WEBSOCKET_PATH};
pub use hub::{ConnectionHub, ConnectionRegistry, HubStats, BROADCAST_QUEUE_CAPACITY, SNAPSHOT_TIMEOUT};
