//! Access logging built on `tower_http::trace`.
//!
//! One span per request carrying the method, path and request id. In
//! development the span also records the full URI, HTTP version, peer address,
//! user agent and referer (roughly Apache "combined" format). In test mode no
//! spans or access lines are emitted; request metrics are still recorded.
//!
//! Failed requests are logged by the error handler, so `on_failure` is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::{Request, Response, header};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, DefaultOnRequest, MakeSpan, OnResponse, TraceLayer,
};
use tracing::{Span, info, info_span};

use crate::config::Environment;
use crate::metrics;

pub type AccessLogLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    AccessSpan,
    DefaultOnRequest,
    AccessOutcome,
    DefaultOnBodyChunk,
    DefaultOnEos,
    (),
>;

/// How much the access log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogMode {
    Off,
    Concise,
    Verbose,
}

impl AccessLogMode {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Test => AccessLogMode::Off,
            Environment::Development => AccessLogMode::Verbose,
            Environment::Production => AccessLogMode::Concise,
        }
    }
}

/// Build the access log layer for `environment`.
pub fn access_log_layer(environment: Environment) -> AccessLogLayer {
    let mode = AccessLogMode::for_environment(environment);

    TraceLayer::new_for_http()
        .make_span_with(AccessSpan { mode })
        .on_response(AccessOutcome { mode })
        .on_failure(())
}

fn header_str<'a, B>(req: &'a Request<B>, name: header::HeaderName) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

#[derive(Debug, Clone, Copy)]
pub struct AccessSpan {
    mode: AccessLogMode,
}

impl<B> MakeSpan<B> for AccessSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let request_id = header_str(req, header::HeaderName::from_static("x-request-id"));

        match self.mode {
            AccessLogMode::Off => Span::none(),
            AccessLogMode::Concise => info_span!(
                "http",
                method = %req.method(),
                path = %req.uri().path(),
                request_id
            ),
            AccessLogMode::Verbose => {
                let peer = req
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.to_string())
                    .unwrap_or_else(|| "-".to_string());

                info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    version = ?req.version(),
                    request_id,
                    peer = %peer,
                    user_agent = header_str(req, header::USER_AGENT),
                    referer = header_str(req, header::REFERER)
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessOutcome {
    mode: AccessLogMode,
}

impl<B> OnResponse<B> for AccessOutcome {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status().as_u16();
        metrics::record_request(status, latency);

        if self.mode == AccessLogMode::Off {
            return;
        }

        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        info!(
            status,
            length,
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_per_environment() {
        assert_eq!(AccessLogMode::for_environment(Environment::Test), AccessLogMode::Off);
        assert_eq!(
            AccessLogMode::for_environment(Environment::Production),
            AccessLogMode::Concise
        );
        assert_eq!(
            AccessLogMode::for_environment(Environment::Development),
            AccessLogMode::Verbose
        );
    }

    #[test]
    fn test_off_mode_emits_no_span() {
        let req = Request::builder().uri("/api/users").body(()).unwrap_or_default();
        let span = AccessSpan { mode: AccessLogMode::Off }.make_span(&req);
        assert!(span.is_none());
    }
}
