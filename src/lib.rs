//! # Attendance API
//!
//! HTTP entry point of the attendance-management backend, plus the one-shot
//! schema bootstrap used to prepare a fresh database.
//!
//! - **Security**: Hardened response headers, origin allow-list, credentialed CORS
//! - **Abuse Control**: Fixed-window rate limiting per client under `/api`
//! - **Uniform Errors**: Every failure rendered as one JSON envelope
//! - **Observability**: Request IDs, structured access logs, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (Errors → Headers → Origin → Rate Limit → Body)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fixed endpoints (/, /api/health) and /uploads              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resource routers (auth, users, attendance, ...)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use attendance_api::{AppState, Config, RouteTable, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     let app = build_router(state, RouteTable::new());
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod resources;
pub mod routes;
pub mod shutdown;
pub mod state;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use error::{AppError, AppResult};
pub use resources::{Resource, RouteTable, RouteTableError};
pub use routes::build_router;
pub use state::AppState;
