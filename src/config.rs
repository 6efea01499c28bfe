//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded once at startup with defaults suited to local
//! development. In production, configure via environment variables or a `.env`
//! file. The resulting [`Config`] is immutable and shared by reference; no other
//! module reads the environment.
//!
//! # Security Configuration
//!
//! - `CORS_ORIGIN`: Comma-separated list of exact allowed origins
//!   (default: `http://localhost:5173`)
//! - `CORS_ORIGIN_SUFFIXES`: Trusted deployment suffixes
//!   (default: `.railway.app,.up.railway.app`)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` header is honored
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_MS`: Window length in milliseconds (default: 900000)
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests allowed per window (default: 100)

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult};

/// Origin allowed when `CORS_ORIGIN` is not set.
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Deployment subdomain suffixes trusted regardless of the allow-list.
pub const DEFAULT_ORIGIN_SUFFIXES: [&str; 2] = [".railway.app", ".up.railway.app"];

/// Default request body ceiling (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Runtime mode. Controls access-log verbosity and error detail exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl Environment {
    /// Lenient parse for deployment labels. Anything unrecognized (`staging`,
    /// `qa`, ...) is not development, so it runs with production behavior.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or_else(|_| {
            warn!(
                environment = label.trim(),
                "Unrecognized environment, using production behavior"
            );
            Environment::Production
        })
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!(
                "unknown environment '{other}' (expected development, production or test)"
            )),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Runtime mode (default: development)
    pub environment: Environment,

    // =========================================================================
    // Origin Policy
    // =========================================================================
    /// Exact-match allowed origins, in configured order
    pub cors_allowed_origins: Vec<String>,

    /// Origins ending in any of these suffixes are allowed
    pub cors_origin_suffixes: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Length of one counting window (default: 15 minutes)
    pub rate_limit_window: Duration,

    /// Requests allowed per client per window (default: 100)
    pub rate_limit_max_requests: u32,

    /// Trusted proxy CIDR ranges. `X-Forwarded-For` is only honored when the
    /// connection originates from one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (client identity is always the peer address)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Request Handling
    // =========================================================================
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    /// Directory served under `/uploads` (default: "uploads")
    pub uploads_dir: PathBuf,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level filter (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value is malformed or the
    /// resulting configuration fails validation.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment: Self::parse_environment(),

            // Origin policy
            cors_allowed_origins: Self::parse_list("CORS_ORIGIN")
                .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]),
            cors_origin_suffixes: Self::parse_list("CORS_ORIGIN_SUFFIXES")
                .unwrap_or_else(default_suffixes),

            // Rate limiting
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                15 * 60 * 1000,
            )?),
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),

            // Request handling
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", DEFAULT_MAX_BODY_SIZE)?,
            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max_requests == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.cors_allowed_origins.is_empty() {
            return Err(AppError::ConfigError(
                "CORS_ORIGIN must list at least one origin".to_string(),
            ));
        }

        if let Some(origin) = self.cors_allowed_origins.iter().find(|o| o.as_str() == "*") {
            // Credentialed CORS cannot be combined with a wildcard origin.
            return Err(AppError::ConfigError(format!(
                "CORS_ORIGIN entry '{origin}' is not allowed; list explicit origins"
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// `APP_ENV` wins over `NODE_ENV`; unset means development.
    fn parse_environment() -> Environment {
        match env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")) {
            Ok(val) => Environment::from_label(&val),
            Err(_) => Environment::default(),
        }
    }

    /// Parse a comma-separated list. Returns `None` when the variable is unset.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name).ok().map(|raw| split_list(&raw))
    }
}

fn default_suffixes() -> Vec<String> {
    DEFAULT_ORIGIN_SUFFIXES.iter().map(|s| s.to_string()).collect()
}

/// Split a comma-separated value, trimming entries and dropping empty ones.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            cors_allowed_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            cors_origin_suffixes: default_suffixes(),
            rate_limit_window: Duration::from_secs(15 * 60),
            rate_limit_max_requests: 100,
            trusted_proxies: vec![],
            max_request_body_size: DEFAULT_MAX_BODY_SIZE,
            uploads_dir: PathBuf::from("uploads"),
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}
