use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Bound on a single outbound frame
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ConnectionId = u64;

/// Protocol state of one streaming connection
///
/// Transitions only move forward. A connection reaches `Closing` either from
/// its read loop or when the hub shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Move to `next`, ignoring attempts to go backwards
    pub fn advance(self, next: ConnectionState) -> ConnectionState {
        self.max(next)
    }

    pub fn is_open(&self) -> bool {
        *self == ConnectionState::Open
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outbound half of a streaming connection
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), SinkError>;

    /// Close the connection; errors are ignored
    async fn close(&self);
}

/// WebSocket write half shared between the snapshot send and broadcasts
pub struct WsClientSink {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
}

impl WsClientSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

#[async_trait]
impl ClientSink for WsClientSink {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), SinkError> {
        let mut sink = self.sink.lock().await;

        tokio::time::timeout(self.write_timeout, sink.send(Message::Text(payload.to_string())))
            .await
            .map_err(|_| SinkError::Timeout(self.write_timeout))?
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(self.write_timeout, sink.close()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let state = ConnectionState::Connecting.advance(ConnectionState::Open);
        assert!(state.is_open());

        let state = state.advance(ConnectionState::Closing);
        assert_eq!(state.advance(ConnectionState::Open), ConnectionState::Closing);
        assert_eq!(state.advance(ConnectionState::Closed), ConnectionState::Closed);
    }
}
