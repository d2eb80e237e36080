use axum::{
    extract::{rejection::JsonRejection, FromRef, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::config::ServerMode;
use crate::error::PriceError;
use crate::market_data::PriceDistributor;
use crate::models::{ManualAddRequest, PriceQuote};
use crate::websocket::ConnectionHub;

use super::responses::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub distributor: Arc<PriceDistributor>,
    pub hub: Arc<ConnectionHub>,
    pub mode: ServerMode,
}

impl FromRef<AppState> for Arc<ConnectionHub> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.hub)
    }
}

/// Convert PriceError to HTTP response
impl IntoResponse for PriceError {
    fn into_response(self) -> Response {
        let status = if self.is_validation_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!("❌ Request failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(ErrorResponse::new(status, self.to_string()))).into_response()
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let hub = state.hub.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        mode: state.mode,
        connections: hub.connections,
        last_update: state.distributor.last_update(),
        hub,
        timestamp: Utc::now(),
    })
}

/// List the current gold prices
#[utoipa::path(
    get,
    path = "/api/gold-prices",
    tag = "Gold Prices",
    responses(
        (status = 200, description = "Current price batch", body = Vec<PriceQuote>),
        (status = 500, description = "Backend failure", body = ErrorResponse)
    )
)]
pub async fn get_prices(State(state): State<AppState>) -> Result<Json<Vec<PriceQuote>>, PriceError> {
    let prices = state.distributor.get_latest_prices().await?;
    Ok(Json(prices))
}

/// Get one gold price by id or type
#[utoipa::path(
    get,
    path = "/api/get/{id}",
    tag = "Gold Prices",
    params(
        ("id" = String, Path, description = "Quote id or type, e.g. `1` or `gold_1`")
    ),
    responses(
        (status = 200, description = "Matching quote", body = PriceQuote),
        (status = 404, description = "No quote with this id or type", body = ErrorResponse),
        (status = 500, description = "Backend failure", body = ErrorResponse)
    )
)]
pub async fn get_price_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, PriceError> {
    match state.distributor.get_price_by_id(&id).await? {
        Some(quote) => Ok(Json(quote).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(StatusCode::NOT_FOUND, "Gold price not found")),
        )
            .into_response()),
    }
}

/// Add prices manually (manual mode only)
#[utoipa::path(
    post,
    path = "/api/add",
    tag = "Gold Prices",
    request_body = ManualAddRequest,
    responses(
        (status = 201, description = "Prices published", body = AddPricesResponse),
        (status = 400, description = "Invalid request body or missing type/name", body = ErrorResponse),
        (status = 500, description = "Publish failed", body = ErrorResponse)
    )
)]
pub async fn add_prices(
    State(state): State<AppState>,
    payload: Result<Json<ManualAddRequest>, JsonRejection>,
) -> Result<Response, PriceError> {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(StatusCode::BAD_REQUEST, rejection.body_text())),
            )
                .into_response());
        }
    };

    let quotes = request.into_quotes()?;
    let count = state.distributor.add_prices_manually(quotes).await?;

    let response = AddPricesResponse {
        message: "Prices added successfully".to_string(),
        count,
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}
