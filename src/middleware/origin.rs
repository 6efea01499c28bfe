//! Origin validation and CORS response headers.
//!
//! Two cooperating layers:
//!
//! - [`OriginGuardLayer`] decides allow/deny from the `Origin` header and fails
//!   denied requests with [`AppError::OriginRejected`], before any router runs.
//! - [`cors_layer`] emits the credentialed CORS headers and answers preflights.
//!   It mirrors the request origin, which is only safe because the guard sits
//!   in front of it.
//!
//! # Policy
//!
//! | `Origin` header                                   | Decision |
//! |---------------------------------------------------|----------|
//! | absent or empty (CLI, native app, server-to-server) | allow  |
//! | exact match in the allow-list                     | allow    |
//! | ends with a trusted deployment suffix             | allow    |
//! | anything else, including non-UTF-8 values         | deny     |
//!
//! Allowing missing origins only protects against unauthorized *browser*
//! cross-origin calls; non-browser clients can send whatever they like.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::Config;
use crate::error::AppError;
use crate::metrics;

/// Methods advertised to allowed origins.
pub const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::OPTIONS,
];

/// Result of checking a request's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header; not a browser cross-origin call.
    NoOrigin,
    /// Listed verbatim in the allow-list.
    Listed,
    /// Matches a trusted deployment suffix.
    TrustedSuffix,
    Denied,
}

impl OriginDecision {
    pub fn is_allowed(self) -> bool {
        self != OriginDecision::Denied
    }
}

/// Immutable allow-list plus suffix rules, built once at startup.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    exact: Vec<String>,
    suffixes: Vec<String>,
}

impl OriginPolicy {
    pub fn new(exact: Vec<String>, suffixes: Vec<String>) -> Self {
        Self { exact, suffixes }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.cors_allowed_origins.clone(),
            config.cors_origin_suffixes.clone(),
        )
    }

    pub fn decide(&self, origin: Option<&str>) -> OriginDecision {
        let Some(origin) = origin.filter(|o| !o.is_empty()) else {
            return OriginDecision::NoOrigin;
        };

        if self.exact.iter().any(|allowed| allowed == origin) {
            OriginDecision::Listed
        } else if self.suffixes.iter().any(|suffix| origin.ends_with(suffix.as_str())) {
            OriginDecision::TrustedSuffix
        } else {
            OriginDecision::Denied
        }
    }

    /// Decide from request headers. A non-UTF-8 `Origin` is denied.
    pub fn decide_request<B>(&self, req: &Request<B>) -> (OriginDecision, Option<String>) {
        match req.headers().get(header::ORIGIN) {
            None => (OriginDecision::NoOrigin, None),
            Some(value) => match value.to_str() {
                Ok(origin) => (self.decide(Some(origin)), Some(origin.to_string())),
                Err(_) => (
                    OriginDecision::Denied,
                    Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                ),
            },
        }
    }
}

/// CORS headers for requests the guard has already let through.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Layer that rejects requests from origins outside the policy.
#[derive(Clone)]
pub struct OriginGuardLayer {
    policy: Arc<OriginPolicy>,
}

impl OriginGuardLayer {
    pub fn new(policy: OriginPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl<S> Layer<S> for OriginGuardLayer {
    type Service = OriginGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OriginGuardService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OriginGuardService<S> {
    inner: S,
    policy: Arc<OriginPolicy>,
}

impl<S> Service<Request<Body>> for OriginGuardService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let (decision, origin) = self.policy.decide_request(&req);

        if !decision.is_allowed() {
            let origin = origin.unwrap_or_default();
            metrics::record_origin_rejected();
            warn!(origin = %origin, path = %req.uri().path(), "Origin rejected");

            let response = AppError::OriginRejected(origin).into_response();
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn policy() -> OriginPolicy {
        OriginPolicy::from_config(&Config {
            cors_allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "https://hr.raymond.example".to_string(),
            ],
            ..Config::default()
        })
    }

    #[test]
    fn test_missing_origin_is_allowed() {
        assert_eq!(policy().decide(None), OriginDecision::NoOrigin);
        assert_eq!(policy().decide(Some("")), OriginDecision::NoOrigin);
    }

    #[test]
    fn test_exact_match_is_allowed() {
        assert_eq!(
            policy().decide(Some("https://hr.raymond.example")),
            OriginDecision::Listed
        );
    }

    #[test]
    fn test_exact_match_is_exact() {
        // No prefix, trailing-slash or port leniency
        assert!(!policy().decide(Some("https://hr.raymond.example/")).is_allowed());
        assert!(!policy().decide(Some("http://localhost:5174")).is_allowed());
        assert!(!policy().decide(Some("HTTP://LOCALHOST:5173")).is_allowed());
    }

    #[test]
    fn test_deployment_suffixes_are_allowed() {
        assert_eq!(
            policy().decide(Some("https://frontend-production.up.railway.app")),
            OriginDecision::TrustedSuffix
        );
        assert_eq!(
            policy().decide(Some("https://attendance.railway.app")),
            OriginDecision::TrustedSuffix
        );
    }

    #[test]
    fn test_lookalike_suffix_is_denied() {
        assert!(!policy().decide(Some("https://railway.app.evil.com")).is_allowed());
        assert!(!policy().decide(Some("https://evilrailway.app.com")).is_allowed());
        assert!(!policy().decide(Some("null")).is_allowed());
    }

    #[test]
    fn test_non_utf8_origin_is_denied() {
        let req = Request::builder()
            .header(header::ORIGIN, HeaderValue::from_bytes(b"https://\xffbad").unwrap())
            .body(Body::empty())
            .unwrap();

        let (decision, origin) = policy().decide_request(&req);
        assert_eq!(decision, OriginDecision::Denied);
        assert!(origin.is_some());
    }
}
