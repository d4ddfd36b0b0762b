//! Axum Handlers for the REST API
//!
//! The relay's only REST surface is a liveness probe. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

/// Report that the service is up.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
