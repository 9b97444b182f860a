pub mod routes;

use crate::state::FaceServiceState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Uploads above this size are rejected before decoding.
const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// Build the API router
pub fn router(state: FaceServiceState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/api/v1/detect", post(routes::detect))
        .route("/api/v1/embed", post(routes::embed))
        .route("/api/v1/embed/batch", post(routes::embed_batch))
        .route("/api/v1/liveness", post(routes::liveness))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
