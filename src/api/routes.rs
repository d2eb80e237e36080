use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServerMode;
use crate::websocket::{socket_io_discovery, websocket_handler};

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI and WebSocket support
///
/// `POST /api/add` is only mounted in manual mode. Every route allows any
/// origin so browser clients served from another port can call it.
pub fn create_router(state: AppState) -> Router {
    let mode = state.mode;

    let router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // WebSocket endpoint and Socket.IO discovery route
        .route("/ws", get(websocket_handler))
        .route("/socket.io", get(socket_io_discovery))
        .route("/socket.io/", get(socket_io_discovery))
        .route("/socket.io/*rest", get(socket_io_discovery))
        .route("/health", get(health_check))
        // Gold price endpoints
        .route("/api/gold-prices", get(get_prices))
        .route("/api/get/:id", get(get_price_by_id));

    // Conditionally merge the manual update route
    let router = if mode == ServerMode::Manual {
        router.route("/api/add", post(add_prices))
    } else {
        router
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
