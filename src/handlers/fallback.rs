//! Terminal responder for requests no route claims.
//!
//! Answers directly with the 404 envelope. This is not an error and never
//! reaches the central error handler.

use axum::Json;
use axum::extract::OriginalUri;
use axum::http::StatusCode;

use crate::models::ErrorEnvelope;

pub const NOT_FOUND_MESSAGE: &str = "Endpoint not found";

/// Echoes the original path and query, as received before any nesting.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> (StatusCode, Json<ErrorEnvelope>) {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    (
        StatusCode::NOT_FOUND,
        Json(ErrorEnvelope::new(NOT_FOUND_MESSAGE).with_path(path)),
    )
}
