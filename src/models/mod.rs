mod api;

pub use api::{EndpointMap, ErrorEnvelope, HealthResponse, ServiceInfo};
