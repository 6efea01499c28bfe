//! Per-client fixed-window rate limiting for the API surface.
//!
//! # Algorithm
//!
//! Time is cut into windows aligned to the wall clock
//! (`window_start = now - now % window`). Each client identity owns one counter
//! tagged with the window it belongs to. A request increments the counter; when
//! the tag is stale the counter restarts at zero first, so a client straddling
//! a boundary gets a fresh quota in the new window no matter how much of the
//! previous one it used. The request that pushes the count past the maximum is
//! rejected with 429.
//!
//! # Scope
//!
//! Only paths under `/api` are counted. `/api/health`, the root endpoint and
//! static uploads are exempt.
//!
//! # Response Headers
//!
//! Every counted response carries:
//! - `X-RateLimit-Limit`: Requests allowed per window
//! - `X-RateLimit-Remaining`: Requests left in the current window
//! - `X-RateLimit-Reset`: Seconds until the current window ends
//!
//! Rejections additionally carry `Retry-After`.
//!
//! # Testing
//!
//! Both the counter store ([`WindowStore`]) and the time source ([`Clock`]) are
//! traits, so tests drive window boundaries with [`ManualClock`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use dashmap::DashMap;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, client_identity};
use crate::metrics;
use crate::models::ErrorEnvelope;

/// Body message of a rejected request.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Path prefix subject to rate limiting.
pub const API_PREFIX: &str = "/api";

/// API paths that are never counted.
pub const EXEMPT_PATHS: [&str; 1] = ["/api/health"];

// =============================================================================
// Clock
// =============================================================================

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Window Store
// =============================================================================

/// Counter storage keyed by client identity.
pub trait WindowStore: Send + Sync + 'static {
    /// Atomically count one request for `key` in the window starting at
    /// `window_start`, restarting the counter if it belongs to an older
    /// window. Returns the count including this request.
    fn increment(&self, key: &str, window_start: u64) -> u32;

    /// Drop every entry whose window started before `window_start`.
    /// Returns how many entries were removed.
    fn sweep(&self, window_start: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    window_start: u64,
    count: u32,
}

/// In-process store. Each key's entry is updated under its shard lock.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    entries: DashMap<String, WindowEntry>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for MemoryWindowStore {
    fn increment(&self, key: &str, window_start: u64) -> u32 {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(WindowEntry {
                window_start,
                count: 0,
            });

        if entry.window_start != window_start {
            entry.window_start = window_start;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count
    }

    fn sweep(&self, window_start: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.window_start >= window_start);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Limiter
// =============================================================================

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window ends.
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// Whole seconds until reset, rounded up, never below one.
    pub fn reset_after_secs(&self) -> u64 {
        let millis = u64::try_from(self.reset_after.as_millis()).unwrap_or(u64::MAX);
        millis.div_ceil(1000).max(1)
    }
}

/// Fixed-window counter service shared by every request in the process.
///
/// Constructed once at startup and handed to the [`RateLimitLayer`].
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    window_ms: u64,
    max_requests: u32,
}

impl FixedWindowLimiter {
    /// Limiter over the system clock and an in-memory store.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self::with_parts(
            window,
            max_requests,
            Arc::new(MemoryWindowStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_parts(
        window: Duration,
        max_requests: u32,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        Self {
            store,
            clock,
            window_ms,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    fn current_window(&self) -> (u64, u64) {
        let now = self.clock.now_millis();
        (now, now - now % self.window_ms)
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let (now, window_start) = self.current_window();
        let count = self.store.increment(key, window_start);
        let reset_at = window_start.saturating_add(self.window_ms);

        RateLimitDecision {
            allowed: count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            reset_after: Duration::from_millis(reset_at.saturating_sub(now)),
        }
    }

    /// Remove counters left over from previous windows.
    pub fn sweep(&self) -> usize {
        let (_, window_start) = self.current_window();
        self.store.sweep(window_start)
    }

    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }
}

/// Whether `path` is counted by the limiter.
pub fn is_rate_limited_path(path: &str) -> bool {
    let under_api = path == API_PREFIX
        || path
            .strip_prefix(API_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'));

    under_api && !EXEMPT_PATHS.contains(&path)
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = FixedWindowLimiter::new(Duration::from_secs(900), 100);
/// let app = Router::new()
///     .route("/api/users", get(handler))
///     .layer(RateLimitLayer::new(limiter, &[]));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: FixedWindowLimiter, trusted_proxies: &[String]) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(TrustedProxyConfig::new(trusted_proxies)),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let mut inner = self.inner.clone();

        if !is_rate_limited_path(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let client = client_identity(&req, &self.trusted_proxies);
        let decision = self.limiter.check(&client);

        if !decision.allowed {
            metrics::record_rate_limited();
            warn!(
                client = %client,
                path = %req.uri().path(),
                retry_after_secs = decision.reset_after_secs(),
                "Rate limit exceeded"
            );

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorEnvelope::new(RATE_LIMIT_MESSAGE)),
            )
                .into_response();
            apply_headers(&mut response, &decision);
            response.headers_mut().insert(
                "retry-after",
                HeaderValue::from(decision.reset_after_secs()),
            );

            return Box::pin(async move { Ok(response) });
        }

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            apply_headers(&mut response, &decision);
            Ok(response)
        })
    }
}

fn apply_headers(response: &mut Response<Body>, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_after_secs()),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn limiter_at(start: u64, max: u32) -> (FixedWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let limiter = FixedWindowLimiter::with_parts(
            WINDOW,
            max,
            Arc::new(MemoryWindowStore::new()),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let (limiter, _clock) = limiter_at(0, 3);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check("10.0.0.1");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_clients_are_counted_independently() {
        let (limiter, _clock) = limiter_at(0, 1);

        assert!(limiter.check("10.0.0.1").allowed);
        assert!(!limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.2").allowed);
    }

    #[test]
    fn test_new_window_grants_fresh_quota() {
        // Start just before a boundary and exhaust the quota
        let (limiter, clock) = limiter_at(59_000, 2);
        assert!(limiter.check("c").allowed);
        assert!(limiter.check("c").allowed);
        assert!(!limiter.check("c").allowed);

        // Two seconds later we are in the next wall-clock window
        clock.advance(Duration::from_secs(2));
        let decision = limiter.check("c");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_reset_after_counts_to_window_end() {
        let (limiter, _clock) = limiter_at(45_500, 5);
        let decision = limiter.check("c");

        assert_eq!(decision.reset_after, Duration::from_millis(14_500));
        assert_eq!(decision.reset_after_secs(), 15);
    }

    #[test]
    fn test_sweep_removes_stale_entries() {
        let (limiter, clock) = limiter_at(0, 10);
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.tracked_clients(), 2);

        clock.advance(WINDOW);
        limiter.check("b");

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let (limiter, _clock) = limiter_at(0, 10_000);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        limiter.check("burst");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(limiter.check("burst").remaining, 10_000 - 2001);
    }

    #[test]
    fn test_rate_limited_paths() {
        assert!(is_rate_limited_path("/api/users"));
        assert!(is_rate_limited_path("/api/attendance/check-in"));
        assert!(is_rate_limited_path("/api"));
        assert!(!is_rate_limited_path("/api/health"));
        assert!(!is_rate_limited_path("/"));
        assert!(!is_rate_limited_path("/uploads/photo.png"));
        assert!(!is_rate_limited_path("/apiary"));
    }
}
