use axum::Json;
use axum::extract::OriginalUri;
use axum::http::{Method, StatusCode};
use axum::response::Response;
use chrono::Utc;

use crate::app::errors::json_error;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "message": "student portal API is running",
        "timestamp": Utc::now(),
    }))
}

/// Router fallback: unknown paths get the usual JSON error body.
pub async fn route_not_found(method: Method, OriginalUri(uri): OriginalUri) -> Response {
    json_error(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("route not found: {method} {}", uri.path()),
    )
}
