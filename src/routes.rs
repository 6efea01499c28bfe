//! Request pipeline assembly.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Error Handler   │ ← renders every AppError as the JSON envelope
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← sets and echoes x-request-id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Origin Guard    │ ← 403 if the origin is not allowed
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← answers preflights
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← panics become AppError::Panic
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (/api only, health exempt)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Decode    │ ← 413 / 400
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Compression    │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Access Log     │
//! └────────┬─────────┘
//!          ▼
//!   /  /api/health  /uploads/*  resource routers  → 404 fallback
//! ```
//!
//! # Route Groups
//!
//! - `/`, `/api/health` - Fixed endpoints
//! - `/uploads/*` - Static files from the uploads directory
//! - `/api/{auth,users,...}` - Resource routers from the [`RouteTable`]

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::handler::HandlerWithoutStateExt;
use axum::http::{HeaderValue, header};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    BodyLimit, OriginGuardLayer, OriginPolicy, RateLimitLayer, access_log_layer, cors_layer,
    decode_body, handle_errors, panic_response, with_security_headers,
};
use crate::resources::RouteTable;
use crate::state::AppState;

/// URL prefix for uploaded files.
pub const UPLOADS_PATH: &str = "/uploads";

/// Build the application router with every pipeline stage in place.
///
/// # Arguments
///
/// * `state` - Application state carrying the config and rate limiter
/// * `routes` - Resource routers to mount under `/api`
pub fn build_router(state: AppState, routes: RouteTable) -> Router {
    let config = state.config.clone();

    info!(
        mounted = routes.len(),
        prefixes = ?routes.prefixes().collect::<Vec<_>>(),
        "Mounting resource routers"
    );

    // =========================================================================
    // Routes
    // =========================================================================
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("cross-origin"),
        ))
        .service(
            ServeDir::new(&config.uploads_dir)
                .append_index_html_on_directories(false)
                .call_fallback_on_method_not_allowed(true)
                .not_found_service(handlers::not_found.into_service()),
        );

    let router = Router::new()
        .route("/", get(handlers::root))
        .route(handlers::HEALTH_PATH, get(handlers::health))
        .nest_service(UPLOADS_PATH, uploads);

    let router = routes
        .apply(router)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::not_found);

    // =========================================================================
    // Pipeline (ServiceBuilder order is outermost first)
    // =========================================================================
    info!(
        window_ms = config.rate_limit_window.as_millis(),
        max_requests = config.rate_limit_max_requests,
        trusted_proxies = config.trusted_proxies.len(),
        "Rate limiting enabled for /api"
    );
    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );

    // Router::layer re-boxes the response body after each group, so stages
    // with different body types can sit in either order.
    let inner = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RateLimitLayer::new(
            state.limiter.clone(),
            &config.trusted_proxies,
        ))
        .layer(from_fn_with_state(
            BodyLimit {
                max_bytes: config.max_request_body_size,
            },
            decode_body,
        ))
        .layer(CompressionLayer::new())
        .layer(access_log_layer(config.environment));

    let origin = ServiceBuilder::new()
        .layer(OriginGuardLayer::new(OriginPolicy::from_config(&config)))
        .layer(cors_layer());

    let outer = ServiceBuilder::new()
        .layer(from_fn_with_state(config.environment, handle_errors))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id());

    let router = router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(inner)
        .layer(origin);

    with_security_headers(router)
        .layer(outer)
        .with_state(state)
}
