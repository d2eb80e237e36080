use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::config::ServerMode;
use crate::models::{ManualAddRequest, PriceQuote, PriceQuoteInput};
use crate::store::QueueStats;
use crate::websocket::{handler as ws_handler, DiscoveryResponse, HubStats};

/// OpenAPI specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gold Price API",
        version = "1.0.0",
        description = "Real-time gold price distribution: REST reads, manual updates and a WebSocket feed at /ws",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::health_check,
        handlers::get_prices,
        handlers::get_price_by_id,
        handlers::add_prices,
        ws_handler::socket_io_discovery,
    ),
    components(
        schemas(
            PriceQuote,
            PriceQuoteInput,
            ManualAddRequest,
            AddPricesResponse,
            ErrorResponse,
            HealthResponse,
            HubStats,
            QueueStats,
            ServerMode,
            DiscoveryResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Gold Prices", description = "Gold price read and update endpoints"),
        (name = "Streaming", description = "WebSocket discovery endpoints"),
    )
)]
pub struct ApiDoc;
