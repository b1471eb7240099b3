pub mod admin;
pub mod excluded;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod stream;
pub mod workers;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

/// Standard error body `{error, message}` used across the API.
pub(crate) fn error_body(error: &str, message: &str) -> Json<Value> {
    Json(json!({ "error": error, "message": message }))
}

/// Log the underlying failure and answer with an opaque 500.
pub(crate) fn internal_error(
    context: &'static str,
    err: impl std::fmt::Display,
) -> (StatusCode, Json<Value>) {
    tracing::error!(error = %err, context, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body("Internal server error", context),
    )
}
