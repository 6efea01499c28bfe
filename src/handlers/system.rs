//! Fixed endpoints answered before any resource router.
//!
//! # Endpoints
//!
//! - `GET /` - Service metadata and the endpoint map
//! - `GET /api/health` - Liveness probe, exempt from rate limiting
//!
//! Neither consults any other subsystem; both succeed while the process runs.

use axum::Json;
use chrono::{SecondsFormat, Utc};

use crate::models::{EndpointMap, HealthResponse, ServiceInfo};
use crate::resources::Resource;

pub const SERVICE_NAME: &str = "Raymond Attendance Management API";
pub const HEALTH_SERVICE_NAME: &str = "Raymond Attendance API";
pub const HEALTH_PATH: &str = "/api/health";

/// Root informational endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "name": "Raymond Attendance Management API",
///   "version": "1.0.0",
///   "status": "running",
///   "endpoints": { "health": "/api/health", "auth": "/api/auth", ... },
///   "documentation": "Use /api/* endpoints to access the API"
/// }
/// ```
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        endpoints: endpoint_map(),
        documentation: "Use /api/* endpoints to access the API",
    })
}

/// Health check endpoint.
///
/// Always returns 200 OK with `status: "healthy"`.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        service: HEALTH_SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn endpoint_map() -> EndpointMap {
    EndpointMap {
        health: HEALTH_PATH,
        auth: Resource::Auth.prefix(),
        users: Resource::Users.prefix(),
        attendance: Resource::Attendance.prefix(),
        leaves: Resource::Leaves.prefix(),
        departments: Resource::Departments.prefix(),
        shifts: Resource::Shifts.prefix(),
        holidays: Resource::Holidays.prefix(),
        reports: Resource::Reports.prefix(),
        face: Resource::Face.prefix(),
        config: Resource::Config.prefix(),
    }
}
