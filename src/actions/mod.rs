pub mod stats;
pub mod status;

pub use stats::*;
pub use status::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;

/// Standard wrapper for resource responses
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

/// Helper function to create consistent JSON error responses
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "errors": message
        })),
    )
}
