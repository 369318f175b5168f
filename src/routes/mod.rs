//! Route modules for the multipart upload server

pub mod upload;

use axum::{extract::DefaultBodyLimit, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config().upload.max_body_size()).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1/multipart", upload::multipart_router())
        .nest("/api/v1/upload", upload::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
