//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the liveness probe, the WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers::{self, HealthResponse},
    state::AppState,
    ws::ws_handler,
};

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::health),
    components(schemas(HealthResponse)),
    tags(
        (name = "Empath Relay", description = "Relays user messages to the language model and emotion classifiers over `/ws`")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .merge(api_router)
}

/// Builds the CORS policy admitting only the configured client origin.
pub fn cors_layer(client_url: &str) -> anyhow::Result<CorsLayer> {
    let origin = client_url
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid client origin '{}'", client_url))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true))
}
