use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::ServerMode;
use crate::websocket::HubStats;

/// Response after a manual add
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddPricesResponse {
    #[schema(example = "Prices added successfully")]
    pub message: String,
    #[schema(example = 7)]
    pub count: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: status.to_string(),
            message: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub mode: ServerMode,
    pub connections: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub hub: HubStats,
    pub timestamp: DateTime<Utc>,
}
