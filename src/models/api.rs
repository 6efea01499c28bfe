use serde::Serialize;

/// Uniform error body for unmatched routes and handled failures.
///
/// ```json
/// { "success": false, "error": "Endpoint not found", "path": "/nope" }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Always `false`
    pub success: bool,
    /// Client-facing error message
    pub error: String,
    /// Original request path (with query), when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Internal error text, only populated in development mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            path: None,
            details: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Paths of every public endpoint group, as advertised by `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointMap {
    pub health: &'static str,
    pub auth: &'static str,
    pub users: &'static str,
    pub attendance: &'static str,
    pub leaves: &'static str,
    pub departments: &'static str,
    pub shifts: &'static str,
    pub holidays: &'static str,
    pub reports: &'static str,
    pub face: &'static str,
    pub config: &'static str,
}

/// Service metadata returned by the root endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
    pub endpoints: EndpointMap,
    pub documentation: &'static str,
}

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process is serving
    pub status: &'static str,
    /// ISO-8601 timestamp with millisecond precision
    pub timestamp: String,
    /// Service display name
    pub service: &'static str,
    /// Service version
    pub version: &'static str,
}
