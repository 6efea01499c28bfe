//! Shared application state for Axum handlers.
//!
//! Holds the immutable configuration and the process-wide rate limiter.
//! Resource routers receive it as `State<AppState>`.
//!
//! # Structured Concurrency
//!
//! The window sweeper runs under a `tokio_util::task::TaskTracker` and stops on
//! its `CancellationToken`. Call `shutdown()` before exit to wait for it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::metrics;
use crate::middleware::FixedWindowLimiter;

/// Lower bound on how often stale windows are swept.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Counting service shared by every request
    pub limiter: FixedWindowLimiter,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state with a limiter derived from `config`.
    ///
    /// Spawns the sweeper, so this must run inside a Tokio runtime.
    pub fn new(config: Config) -> Self {
        let limiter =
            FixedWindowLimiter::new(config.rate_limit_window, config.rate_limit_max_requests);
        Self::with_limiter(config, limiter)
    }

    /// Build state around an existing limiter, e.g. one driven by a manual clock.
    pub fn with_limiter(config: Config, limiter: FixedWindowLimiter) -> Self {
        let state = Self {
            config: Arc::new(config),
            limiter,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_window_sweeper();
        state
    }

    /// Periodically drop counters from windows that have ended.
    fn spawn_window_sweeper(&self) {
        let limiter = self.limiter.clone();
        let every = limiter.window().max(MIN_SWEEP_INTERVAL);
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Window sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        let remaining = limiter.tracked_clients();
                        metrics::set_rate_limit_clients(remaining);
                        trace!(removed, remaining, "Swept expired rate-limit windows");
                    }
                }
            }

            debug!("Window sweeper shutting down");
        });
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limiter_follows_config() {
        let state = AppState::new(Config {
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 7,
            ..Config::default()
        });

        assert_eq!(state.limiter.window(), Duration::from_secs(60));
        assert_eq!(state.limiter.max_requests(), 7);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_uptime_starts_at_zero() {
        let state = AppState::new(Config::default());
        assert_eq!(state.uptime_seconds(), 0);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_completes() {
        let state = AppState::new(Config::default());
        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .expect("shutdown should not hang");
    }
}
