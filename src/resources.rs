//! Resource handler sets and the route table that mounts them.
//!
//! Each of the ten resource domains (auth, users, attendance, ...) is served by
//! a [`Router`] supplied from outside the pipeline. The [`RouteTable`] binds
//! each router to a path prefix, fixed before the server starts.
//!
//! Prefixes must be disjoint: none may equal, or be a path-prefix of, another.
//! That makes dispatch order-independent, so the first matching entry is also
//! the only matching one. A resource with nothing mounted answers with the 404
//! envelope like any other unknown path.
//!
//! ```rust,ignore
//! let routes = RouteTable::new()
//!     .mount(Resource::Users, users::router())?
//!     .mount(Resource::Leaves, leaves::router())?;
//! let app = build_router(state, routes);
//! ```

use std::fmt;

use axum::Router;
use thiserror::Error;

use crate::handlers::HEALTH_PATH;
use crate::state::AppState;

/// The resource domains reachable under `/api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Auth,
    Users,
    Attendance,
    Leaves,
    Departments,
    Shifts,
    Holidays,
    Reports,
    Face,
    Config,
}

impl Resource {
    pub const ALL: [Resource; 10] = [
        Resource::Auth,
        Resource::Users,
        Resource::Attendance,
        Resource::Leaves,
        Resource::Departments,
        Resource::Shifts,
        Resource::Holidays,
        Resource::Reports,
        Resource::Face,
        Resource::Config,
    ];

    /// Key used in the root endpoint map.
    pub fn key(self) -> &'static str {
        match self {
            Resource::Auth => "auth",
            Resource::Users => "users",
            Resource::Attendance => "attendance",
            Resource::Leaves => "leaves",
            Resource::Departments => "departments",
            Resource::Shifts => "shifts",
            Resource::Holidays => "holidays",
            Resource::Reports => "reports",
            Resource::Face => "face",
            Resource::Config => "config",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Resource::Auth => "/api/auth",
            Resource::Users => "/api/users",
            Resource::Attendance => "/api/attendance",
            Resource::Leaves => "/api/leaves",
            Resource::Departments => "/api/departments",
            Resource::Shifts => "/api/shifts",
            Resource::Holidays => "/api/holidays",
            Resource::Reports => "/api/reports",
            Resource::Face => "/api/face",
            Resource::Config => "/api/config",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Errors from building a [`RouteTable`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("Invalid route prefix '{prefix}': {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("Route prefix '{0}' is already mounted")]
    Duplicate(String),

    #[error("Route prefix '{new}' overlaps mounted prefix '{existing}'")]
    Overlapping { new: String, existing: String },
}

/// Ordered `(prefix, router)` pairs, immutable once handed to the pipeline.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<(String, Router<AppState>)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount the handler set for one of the standard resources.
    pub fn mount(self, resource: Resource, router: Router<AppState>) -> Result<Self, RouteTableError> {
        self.mount_at(resource.prefix(), router)
    }

    /// Mount a handler set at an arbitrary prefix under `/api`.
    pub fn mount_at(
        mut self,
        prefix: impl Into<String>,
        router: Router<AppState>,
    ) -> Result<Self, RouteTableError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;

        for (existing, _) in &self.entries {
            if *existing == prefix {
                return Err(RouteTableError::Duplicate(prefix));
            }
            if is_path_prefix(existing, &prefix) || is_path_prefix(&prefix, existing) {
                return Err(RouteTableError::Overlapping {
                    new: prefix,
                    existing: existing.clone(),
                });
            }
        }

        self.entries.push((prefix, router));
        Ok(self)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(prefix, _)| prefix.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nest every entry into `router`, in table order.
    pub(crate) fn apply(self, router: Router<AppState>) -> Router<AppState> {
        self.entries
            .into_iter()
            .fold(router, |router, (prefix, handlers)| router.nest(&prefix, handlers))
    }
}

fn validate_prefix(prefix: &str) -> Result<(), RouteTableError> {
    let invalid = |reason| {
        Err(RouteTableError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason,
        })
    };

    let Some(rest) = prefix.strip_prefix("/api/") else {
        return invalid("must start with /api/");
    };
    if rest.is_empty() {
        return invalid("must name a resource");
    }
    if prefix.ends_with('/') {
        return invalid("must not end with '/'");
    }
    if rest.split('/').any(str::is_empty) {
        return invalid("must not contain empty segments");
    }
    if prefix.contains(['{', '}', '*', '?', '#', ' ']) {
        return invalid("must be a literal path");
    }
    if prefix == HEALTH_PATH || is_path_prefix(prefix, HEALTH_PATH) {
        return invalid("collides with the health endpoint");
    }
    Ok(())
}

/// Whether `outer` is a whole-segment prefix of `inner`.
fn is_path_prefix(outer: &str, inner: &str) -> bool {
    inner
        .strip_prefix(outer)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_prefixes_are_disjoint() {
        let table = Resource::ALL
            .iter()
            .try_fold(RouteTable::new(), |table, r| table.mount(*r, Router::new()))
            .expect("standard resources should mount");

        assert_eq!(table.len(), 10);
        assert_eq!(table.prefixes().next(), Some("/api/auth"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = RouteTable::new()
            .mount(Resource::Users, Router::new())
            .unwrap()
            .mount_at("/api/users", Router::new())
            .err()
            .unwrap();
        assert_eq!(err, RouteTableError::Duplicate("/api/users".to_string()));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = RouteTable::new()
            .mount(Resource::Reports, Router::new())
            .unwrap()
            .mount_at("/api/reports/monthly", Router::new())
            .err()
            .unwrap();
        assert!(matches!(err, RouteTableError::Overlapping { .. }));

        // Shared text but different segment is fine
        assert!(
            RouteTable::new()
                .mount(Resource::Users, Router::new())
                .unwrap()
                .mount_at("/api/usersettings", Router::new())
                .is_ok()
        );
    }

    #[test]
    fn test_malformed_prefixes() {
        for prefix in [
            "/users",
            "/api/",
            "/api/users/",
            "/api//users",
            "/api/{id}",
            "/api/health",
            "api/users",
        ] {
            assert!(
                matches!(
                    validate_prefix(prefix),
                    Err(RouteTableError::InvalidPrefix { .. })
                ),
                "{prefix} should be rejected"
            );
        }
    }
}
