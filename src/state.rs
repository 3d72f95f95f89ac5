//! Shared application state for Axum handlers.
//!
//! Holds one instance of every security component, built once from
//! [`Config`] and shared by the security layer and the handlers. The rate
//! limiter's window map is the only mutable shared state.
//!
//! # Structured Concurrency
//!
//! The window sweeper runs under a `tokio_util::task::TaskTracker` and
//! stops on a `CancellationToken`. Call `shutdown()` before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::directory::UserDirectory;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::cors::CorsPolicy;
use crate::middleware::csp::CspPolicyBuilder;
use crate::middleware::csrf::CsrfGuard;
use crate::middleware::headers::SecurityHeaderWriter;
use crate::middleware::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::middleware::security::{RouteGate, SecurityLayer};
use crate::session::SessionManager;

/// How often lapsed rate-limit windows are evicted.
pub const WINDOW_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state.
///
/// Cloned per request; every component is internally reference counted.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub rate_limiter: RateLimiter,
    pub cors: CorsPolicy,
    pub csrf: CsrfGuard,
    pub csp: CspPolicyBuilder,
    pub headers: SecurityHeaderWriter,
    pub gate: RouteGate,
    pub sessions: SessionManager,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state on the system clock.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if a component rejects the configuration.
    pub fn new(config: Config, directory: Arc<dyn UserDirectory>) -> AppResult<Self> {
        Self::with_clock(config, directory, Arc::new(SystemClock))
    }

    /// Build state on an explicit clock. Must run inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`AppState::new`].
    pub fn with_clock(
        config: Config,
        directory: Arc<dyn UserDirectory>,
        clock: SharedClock,
    ) -> AppResult<Self> {
        let rate_limiter =
            RateLimiter::in_memory(RateLimitPolicy::from_config(&config), clock.clone())
                .map_err(|e| AppError::ConfigError(e.to_string()))?;
        let csrf = CsrfGuard::from_config(&config, clock.clone())?;
        let sessions = SessionManager::new(&config, csrf.clone(), directory, clock.clone())?;

        let state = Self {
            cors: CorsPolicy::from_config(&config),
            csp: CspPolicyBuilder::from_config(&config),
            headers: SecurityHeaderWriter::new(config.environment),
            gate: RouteGate::from_config(&config),
            config: Arc::new(config),
            clock,
            rate_limiter,
            csrf,
            sessions,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_window_sweeper();
        Ok(state)
    }

    /// The security middleware over this state's components.
    pub fn security_layer(&self) -> SecurityLayer {
        SecurityLayer::new(
            self.rate_limiter.clone(),
            self.cors.clone(),
            self.csrf.clone(),
            self.csp.clone(),
            self.headers,
            self.gate.clone(),
        )
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        self.sessions.directory()
    }

    fn spawn_window_sweeper(&self) {
        let limiter = self.rate_limiter.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(WINDOW_SWEEP_INTERVAL);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Window sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.purge_expired();
                        let active = limiter.active_windows();
                        metrics::set_rate_limit_windows(active);
                        trace!(removed, active, "Rate-limit windows swept");
                    }
                }
            }

            debug!("Window sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        debug!("Initiating graceful shutdown of background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        debug!("All background tasks completed");
    }

    /// Whether `shutdown()` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryUserDirectory;

    fn state() -> (AppState, ManualClock) {
        let clock = ManualClock::default();
        let state = AppState::with_clock(
            Config::default(),
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (state, clock)
    }

    #[tokio::test]
    async fn test_shutdown_stops_sweeper() {
        let (state, _) = state();
        assert!(!state.is_shutting_down());

        tokio::time::timeout(Duration::from_secs(5), state.shutdown())
            .await
            .expect("shutdown should complete");
        assert!(state.is_shutting_down());
    }

    #[tokio::test]
    async fn test_clones_share_rate_limit_state() {
        let (state, _) = state();
        let clone = state.clone();

        state.rate_limiter.check_and_consume("9.9.9.9", false);
        assert_eq!(clone.rate_limiter.active_windows(), 1);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = Config {
            rate_limit_max: 0,
            ..Config::default()
        };
        let result = AppState::new(config, Arc::new(InMemoryUserDirectory::new()));
        assert!(result.is_err());
    }
}
