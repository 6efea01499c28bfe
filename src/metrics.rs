//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed on a dedicated listener when `METRICS_PORT` is set.
//! Without an installed recorder every `record_*` call is a no-op, so tests
//! and metric-less deployments pay nothing.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `attendance_http_requests_total` - Completed requests (label: status)
//! - `attendance_rate_limited_total` - Requests rejected by the rate limiter
//! - `attendance_origin_rejected_total` - Requests rejected by the origin guard
//! - `attendance_errors_total` - Errors reaching the central handler (label: kind)
//!
//! ## Histograms
//! - `attendance_request_duration_seconds` - Request latency (label: status)
//!
//! ## Gauges
//! - `attendance_rate_limit_clients` - Client windows currently tracked

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "attendance_http_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "attendance_rate_limited_total";
    pub const ORIGIN_REJECTED_TOTAL: &str = "attendance_origin_rejected_total";
    pub const ERRORS_TOTAL: &str = "attendance_errors_total";
    pub const REQUEST_DURATION_SECONDS: &str = "attendance_request_duration_seconds";
    pub const RATE_LIMIT_CLIENTS: &str = "attendance_rate_limit_clients";
}

/// Install the Prometheus exporter and describe every metric.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::HTTP_REQUESTS_TOTAL, "Total HTTP requests completed");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected with 429 by the rate limiter"
    );
    describe_counter!(
        names::ORIGIN_REJECTED_TOTAL,
        "Requests rejected because their Origin is not allowed"
    );
    describe_counter!(
        names::ERRORS_TOTAL,
        "Errors handled by the central error handler"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_CLIENTS,
        "Client windows held by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_request(status: u16, latency: Duration) {
    let status = status.to_string();
    counter!(names::HTTP_REQUESTS_TOTAL, "status" => status.clone()).increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "status" => status).record(latency.as_secs_f64());
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_origin_rejected() {
    counter!(names::ORIGIN_REJECTED_TOTAL).increment(1);
}

/// Record an error by its stable kind, e.g. `origin_rejected` or `payload_too_large`.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn set_rate_limit_clients(count: usize) {
    // Precision loss only past 2^53 clients
    #[allow(clippy::cast_precision_loss)]
    gauge!(names::RATE_LIMIT_CLIENTS).set(count as f64);
}
