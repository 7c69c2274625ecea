//! Route table.

use axum::routing::get;
use axum::Router;

use super::types::{ServerState, MAX_REQUEST_BODY_SIZE};
use crate::handlers::{basic, filters, ws};

pub fn create_router(state: ServerState) -> Router {
    let api_routes = Router::new()
        .route("/api/health", get(basic::health_handler))
        .route("/api/broadcast/stats", get(basic::broadcast_stats_handler))
        .route("/api/filters", get(filters::list_filters_handler))
        .route(
            "/api/filters/:name/config",
            get(filters::get_filter_config_handler).put(filters::put_filter_config_handler),
        );

    let websocket_routes = Router::new().route("/ws/:asset/:topic", get(ws::subscribe_handler));

    api_routes
        .merge(websocket_routes)
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_REQUEST_BODY_SIZE,
        ))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
