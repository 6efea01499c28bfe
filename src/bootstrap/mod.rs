//! One-shot schema bootstrap for a fresh database.
//!
//! Reads the schema file, neutralizes grants to a role the target may not
//! have ([`grants`]), and runs the result as a single batch ([`runner`]).
//! Whether re-running is safe depends on the schema file itself using
//! existence checks; the runner adds no idempotency of its own.

pub mod grants;
pub mod runner;

use std::path::PathBuf;

use thiserror::Error;

pub use grants::{DEFAULT_GRANT_ROLE, GrantRewriter, Rewrite};
pub use runner::{
    BootstrapOptions, BootstrapReport, PreparedSchema, connect_options, load_schema, run,
};

/// Schema file shipped with the crate.
pub const DEFAULT_SCHEMA_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/database/init.sql");

/// Login seeded by the schema file.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@raymond.com";
pub const DEFAULT_ADMIN_PASSWORD: &str = "Admin@123";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid grant role '{0}': expected a plain SQL identifier")]
    InvalidRole(String),

    #[error("Failed to read schema file {}: {source}", path.display())]
    ReadSchema {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
