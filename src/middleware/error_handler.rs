//! Central error handling: the terminal stage for every failed request.
//!
//! Any stage or handler that fails returns an [`AppError`], whose response
//! carries an [`ErrorReport`] extension. This middleware sits outside every
//! other stage, so it sees each such response on the way out. It logs the
//! report server-side and re-renders the body as the uniform envelope:
//!
//! ```json
//! { "success": false, "error": "Not allowed by CORS", "path": "/api/users" }
//! ```
//!
//! The internal error text is added as `details` only in development mode.
//!
//! Failures produced outside [`AppError`] (axum extractor rejections such as a
//! bad `Path<u32>`, or a bare `StatusCode` from a resource handler) carry no
//! report. Any such 4xx/5xx whose body is not already JSON gets a synthesized
//! report and the same envelope. Successes and JSON errors (the 404 envelope,
//! rate-limit rejections) pass through untouched.
//!
//! Panics inside handlers are caught by [`panic_response`] (wired through
//! `CatchPanicLayer`) and enter the same path as [`AppError::Panic`].

use std::any::Any;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::config::Environment;
use crate::error::{AppError, ErrorReport};
use crate::metrics;
use crate::models::ErrorEnvelope;

/// Middleware entry point. Wire with `axum::middleware::from_fn_with_state`.
pub async fn handle_errors(
    State(environment): State<Environment>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let (response, report) = match response.extensions().get::<ErrorReport>().cloned() {
        Some(report) => (response, report),
        None if is_unrendered_failure(&response) => unreported(response).await,
        None => return response,
    };

    metrics::record_error(report.kind);
    if report.status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = report.status.as_u16(),
            kind = report.kind,
            error = %report.detail,
            "Request failed"
        );
    } else {
        warn!(
            method = %method,
            path = %path,
            status = report.status.as_u16(),
            kind = report.kind,
            error = %report.detail,
            "Request rejected"
        );
    }

    render(response, &report, path, environment)
}

/// Largest body read back as the message of an unreported failure.
const MAX_REASON_BYTES: usize = 1024;

/// A 4xx/5xx without a report whose body is not already JSON.
fn is_unrendered_failure(response: &Response) -> bool {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return false;
    }

    !response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Build a report for a failure that bypassed `AppError`.
///
/// Client errors expose the (short, plain-text) body as the message, which is
/// what axum rejections put there. Server errors only expose the canonical
/// reason phrase.
async fn unreported(response: Response) -> (Response, ErrorReport) {
    let (parts, body) = response.into_parts();
    let status = parts.status;
    let reason = status.canonical_reason().unwrap_or("Request failed").to_string();

    let text = if parts.headers.contains_key(header::CONTENT_ENCODING) {
        None
    } else {
        to_bytes(body, MAX_REASON_BYTES)
            .await
            .ok()
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    };

    let (kind, message) = if status.is_server_error() {
        ("handler_failure", reason.clone())
    } else {
        ("handler_rejection", text.clone().unwrap_or_else(|| reason.clone()))
    };

    let report = ErrorReport {
        status,
        kind,
        message,
        detail: text.unwrap_or(reason),
    };
    (Response::from_parts(parts, Body::empty()), report)
}

/// Replace the body with the envelope, keeping status, headers and extensions.
fn render(response: Response, report: &ErrorReport, path: String, environment: Environment) -> Response {
    let mut envelope = ErrorEnvelope::new(report.message.clone()).with_path(path);
    if environment.is_development() {
        envelope = envelope.with_details(report.detail.clone());
    }

    let (mut parts, _) = response.into_parts();
    let body = match serde_json::to_vec(&envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to serialize error envelope");
            br#"{"success":false,"error":"Internal server error"}"#.to_vec()
        }
    };

    parts.status = report.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    Response::from_parts(parts, Body::from(body))
}

/// Turn a caught panic payload into an error response.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    };

    AppError::Panic(detail).into_response()
}
