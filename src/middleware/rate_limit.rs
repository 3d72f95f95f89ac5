//! Fixed-window rate limiting keyed by client identity.
//!
//! # Algorithm
//!
//! Each `ClientKey` owns one [`RateWindow`] `{count, reset_at}`:
//!
//! - First request: window created with `count = 1`, `reset_at = now + window`; allowed.
//! - Within the window: if `count >= ceiling` the request is denied and the
//!   counter is left alone, otherwise it is incremented and allowed.
//! - Once `now > reset_at` the window is replaced by a fresh one with
//!   `count = 1`, regardless of the previous count. Windows are never
//!   incremented after they lapse.
//!
//! This is a fixed window, not a sliding one: a client can spend its full
//! allowance at the end of one window and again at the start of the next.
//!
//! # Ceilings
//!
//! Routes under a strict prefix (`/api/auth`, `/api/admin` by default) use
//! `RATE_LIMIT_STRICT_MAX` (1000), everything else `RATE_LIMIT_MAX` (100).
//! The strict ceiling is numerically *higher* than the standard one. That is
//! the inherited behaviour and is kept as-is pending a product decision.
//!
//! Strict and standard requests share the same window per client key; only
//! the ceiling applied to the request differs.
//!
//! # Concurrency
//!
//! The read-modify-write of a window happens under the DashMap shard lock for
//! that key, so concurrent requests from one client can never under-count.
//! Two requests racing exactly at the window boundary may both observe the
//! lapsed window; one of them recreates it and the other counts into the new
//! window. That imprecision is accepted.
//!
//! # Limitations
//!
//! [`InMemoryRateLimitStore`] is process-local. Several instances behind a load
//! balancer each enforce their own ceiling. Implement [`RateLimitStore`] over a
//! shared key-value cache to lift that.
//!
//! # Response Headers
//!
//! - `X-Rate-Limit-Limit`: ceiling applied to this request
//! - `X-Rate-Limit-Remaining`: requests left in the current window
//! - `X-Rate-Limit-Reset`: window end, Unix seconds
//! - `Retry-After`: on 429 only, seconds until the window resets

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::Config;

pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-rate-limit-limit");
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-rate-limit-remaining");
pub const RATE_LIMIT_RESET_HEADER: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Window length cannot be zero.
    ZeroWindow,
    /// Window length does not fit in a timestamp delta.
    WindowTooLarge,
    /// A ceiling cannot be zero.
    ZeroLimit,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
            RateLimitError::WindowTooLarge => write!(f, "rate limit window is too large"),
            RateLimitError::ZeroLimit => write!(f, "rate limit ceilings must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Per-client counter for one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of one `check_and_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Ceiling that applied to this request.
    pub limit: u32,
    /// Requests left in the window after this one.
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until the window resets, rounded up, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0);
        let secs = u64::try_from(millis).unwrap_or(0).div_ceil(1000);
        secs.max(1)
    }

    /// Write the informational `X-Rate-Limit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(self.remaining));
        headers.insert(
            RATE_LIMIT_RESET_HEADER,
            HeaderValue::from(self.reset_at.timestamp()),
        );
    }
}

/// Backing store for rate-limit windows.
///
/// `hit` must be atomic per key: the lapsed-window check, the ceiling check
/// and the increment happen as one step with respect to other callers using
/// the same key.
pub trait RateLimitStore: Send + Sync + fmt::Debug {
    /// Count one request for `key` against `limit`.
    fn hit(&self, key: &str, limit: u32, window: TimeDelta, now: DateTime<Utc>) -> RateDecision;

    /// Drop windows that lapsed before `now`. Returns the number removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of windows currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all windows.
    fn clear(&self);
}

/// Process-local window store on a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, RateWindow>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one key's window.
    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| *w)
    }
}

/// `now + window`, saturating at the latest representable instant.
fn window_end(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn hit(&self, key: &str, limit: u32, window: TimeDelta, now: DateTime<Utc>) -> RateDecision {
        // The entry guard holds the shard write lock until it is dropped.
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                reset_at: window_end(now, window),
            });
        let current = entry.value_mut();

        if now > current.reset_at {
            *current = RateWindow {
                count: 0,
                reset_at: window_end(now, window),
            };
        }

        if current.count >= limit {
            return RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: current.reset_at,
            };
        }

        current.count += 1;
        RateDecision {
            allowed: true,
            limit,
            remaining: limit - current.count,
            reset_at: current.reset_at,
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at >= now);
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn clear(&self) {
        self.windows.clear();
    }
}

/// Ceilings and window length.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
    pub strict_max_requests: u32,
    pub strict_prefixes: Vec<String>,
}

impl RateLimitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: config.rate_limit_window,
            max_requests: config.rate_limit_max,
            strict_max_requests: config.rate_limit_strict_max,
            strict_prefixes: config.rate_limit_strict_prefixes.clone(),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Fixed-window rate limiter over an injectable [`RateLimitStore`].
///
/// Cloning is cheap and shares the store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
    window: TimeDelta,
    max_requests: u32,
    strict_max_requests: u32,
    strict_prefixes: Arc<Vec<String>>,
}

impl RateLimiter {
    /// Build a limiter over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] for a zero window, an out-of-range window,
    /// or a zero ceiling.
    pub fn new(
        policy: RateLimitPolicy,
        store: Arc<dyn RateLimitStore>,
        clock: SharedClock,
    ) -> Result<Self, RateLimitError> {
        if policy.window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if policy.max_requests == 0 || policy.strict_max_requests == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        let window =
            TimeDelta::from_std(policy.window).map_err(|_| RateLimitError::WindowTooLarge)?;

        Ok(Self {
            store,
            clock,
            window,
            max_requests: policy.max_requests,
            strict_max_requests: policy.strict_max_requests,
            strict_prefixes: Arc::new(policy.strict_prefixes),
        })
    }

    /// Build a limiter with a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::new`].
    pub fn in_memory(policy: RateLimitPolicy, clock: SharedClock) -> Result<Self, RateLimitError> {
        Self::new(policy, Arc::new(InMemoryRateLimitStore::new()), clock)
    }

    /// Whether `path` falls under a strict prefix.
    pub fn is_strict_path(&self, path: &str) -> bool {
        self.strict_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Ceiling for a strict or standard request.
    pub fn limit_for(&self, strict: bool) -> u32 {
        if strict {
            self.strict_max_requests
        } else {
            self.max_requests
        }
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check_and_consume(&self, key: &str, strict: bool) -> RateDecision {
        let decision = self
            .store
            .hit(key, self.limit_for(strict), self.window, self.clock.now());

        if !decision.allowed {
            debug!(client_ip = %key, strict, limit = decision.limit, "Rate limit ceiling reached");
        }
        decision
    }

    /// Seconds until `decision`'s window resets, by this limiter's clock.
    pub fn retry_after_secs(&self, decision: &RateDecision) -> u64 {
        decision.retry_after_secs(self.clock.now())
    }

    /// Drop lapsed windows. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now())
    }

    /// Number of live windows.
    pub fn active_windows(&self) -> usize {
        self.store.len()
    }

    /// Forget every window.
    pub fn reset(&self) {
        self.store.clear();
    }
}
