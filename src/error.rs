use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorEnvelope;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every failure surfaced by the pipeline stages or by a resource handler is
/// expressed as an `AppError`. Rendering produces the uniform JSON envelope and
/// attaches an [`ErrorReport`] to the response so the central error handler can
/// log it and decide how much detail the client sees.
///
/// Rate-limit rejections and unmatched routes are not errors: those stages
/// answer directly.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Origin '{0}' not allowed by CORS")]
    OriginRejected(String),

    #[error("Request body of {received} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize, received: usize },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// What the central error handler needs to know about a failed request.
///
/// Stored in the response extensions by [`AppError::into_response`].
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    /// Stable machine-readable kind, used for logging and metrics.
    pub kind: &'static str,
    /// Client-safe message.
    pub message: String,
    /// Full internal error text. Only exposed in development mode.
    pub detail: String,
}

impl AppError {
    /// Status code, error kind, and the message that is safe to show clients.
    pub fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::OriginRejected(_) => (
                StatusCode::FORBIDDEN,
                "origin_rejected",
                "Not allowed by CORS".to_string(),
            ),
            AppError::PayloadTooLarge { .. } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request entity too large".to_string(),
            ),
            AppError::SerializationError(e) => (
                StatusCode::BAD_REQUEST,
                "serialization_error",
                sanitize_serde_error(e),
            ),
            AppError::MalformedBody(msg) => (StatusCode::BAD_REQUEST, "malformed_body", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),

            // Internal errors - never expose internal details to clients
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            ),
            AppError::Panic(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "panic",
                "Internal server error".to_string(),
            ),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error".to_string(),
            ),
        }
    }

    pub fn report(&self) -> ErrorReport {
        let (status, kind, message) = self.classify();
        ErrorReport {
            status,
            kind,
            message,
            detail: self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = self.report();
        let body = ErrorEnvelope::new(report.message.clone());

        let mut response = (report.status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    use serde_json::error::Category;

    let msg = e.to_string();

    if let Some(field) = backticked(&msg, "missing field") {
        return format!("Missing required field: {field}");
    }

    if let Some(field) = backticked(&msg, "unknown field") {
        return format!("Unknown field: {field}");
    }

    match e.classify() {
        Category::Syntax | Category::Eof => "Malformed JSON in request body".to_string(),
        Category::Data if msg.contains("invalid type") => {
            "Invalid data type in request body".to_string()
        }
        _ => "Invalid request format".to_string(),
    }
}

/// Extract the first `` `quoted` `` token from a serde message containing `marker`.
fn backticked<'a>(msg: &'a str, marker: &str) -> Option<&'a str> {
    if !msg.contains(marker) {
        return None;
    }
    let start = msg.find('`')? + 1;
    let len = msg.get(start..)?.find('`')?;
    msg.get(start..start + len)
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    #[allow(dead_code)]
    struct CheckIn {
        employee_id: u32,
    }

    #[test]
    fn test_origin_rejected_maps_to_forbidden() {
        let err = AppError::OriginRejected("https://evil.example".to_string());
        let (status, kind, message) = err.classify();

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(kind, "origin_rejected");
        assert_eq!(message, "Not allowed by CORS");
    }

    #[test]
    fn test_payload_too_large_status() {
        let err = AppError::PayloadTooLarge {
            limit: 10,
            received: 11,
        };
        assert_eq!(err.classify().0, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = AppError::Internal("connection pool exhausted at db-3".to_string());
        let report = err.report();

        assert_eq!(report.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(report.message, "Internal server error");
        assert!(report.detail.contains("db-3"));
    }

    #[test]
    fn test_into_response_attaches_report() {
        let response = AppError::NotFound("Leave request 42".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.kind, "not_found");
        assert_eq!(report.message, "Leave request 42");
    }

    #[test]
    fn test_sanitize_missing_field() {
        let e = serde_json::from_str::<CheckIn>("{}").unwrap_err();
        assert_eq!(sanitize_serde_error(&e), "Missing required field: employee_id");
    }

    #[test]
    fn test_sanitize_unknown_field() {
        let e = serde_json::from_str::<CheckIn>(r#"{"employee_id":1,"shift":2}"#).unwrap_err();
        assert_eq!(sanitize_serde_error(&e), "Unknown field: shift");
    }

    #[test]
    fn test_sanitize_invalid_type() {
        let e = serde_json::from_str::<CheckIn>(r#"{"employee_id":"x"}"#).unwrap_err();
        assert_eq!(sanitize_serde_error(&e), "Invalid data type in request body");
    }

    #[test]
    fn test_sanitize_syntax_error() {
        let e = serde_json::from_str::<serde_json::Value>("{\"a\":").unwrap_err();
        assert_eq!(sanitize_serde_error(&e), "Malformed JSON in request body");
    }
}
