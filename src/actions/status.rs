//! Health endpoint for the pipeline process.

use axum::response::{IntoResponse, Json};
use serde_json::json;

/// GET /health
/// Liveness check; returns ok as long as the process is serving requests.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
