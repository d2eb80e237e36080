use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::hub::ConnectionHub;

/// Path of the real streaming endpoint
pub const WEBSOCKET_PATH: &str = "/ws";

/// Answer to Socket.IO-style discovery requests
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DiscoveryResponse {
    pub websocket: bool,
    pub path: String,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<ConnectionHub>>,
) -> Response {
    ws.on_upgrade(move |socket| hub.accept(socket))
}

/// Point Socket.IO clients at the plain WebSocket endpoint
#[utoipa::path(
    get,
    path = "/socket.io/",
    tag = "Streaming",
    responses(
        (status = 200, description = "Streaming endpoint location", body = DiscoveryResponse)
    )
)]
pub async fn socket_io_discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        websocket: true,
        path: WEBSOCKET_PATH.to_string(),
    })
}
