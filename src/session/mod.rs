//! Stateless cookie sessions.
//!
//! # Lifecycle
//!
//! ```text
//! NoSession ──create──▶ Valid ──(exp - now <= refresh window)──▶ ExpiringSoon
//!                        ▲  │                                        │
//!                        └──┴───────────────rotate───────────────────┘
//!                           │
//!            expired / bad signature / user gone ──▶ destroyed ──▶ NoSession
//! ```
//!
//! Nothing is stored server-side. The `session` cookie holds a signed token
//! and every read re-checks signature, expiry and the user's current
//! directory record. Any failure destroys both cookies and reads as
//! logged out.
//!
//! # Timeouts
//!
//! - idle (default 24h): lifetime of an ordinary login
//! - absolute (default 7d): lifetime of a "remember me" login
//!
//! Rotation keeps the lifetime the token was issued with.
//!
//! # Legacy Tokens
//!
//! When enabled, a token that fails current verification is retried with
//! [`LegacyTokenCodec`]. The two paths are separate steps so the legacy one
//! can be switched off with `LEGACY_SESSIONS_ENABLED=false` and later deleted.

pub mod cookies;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::directory::{User, UserDirectory};
use crate::error::{AppError, AppResult};
use crate::middleware::csrf::{CSRF_COOKIE_NAME, CsrfGuard};
use crate::middleware::events::{SecurityEventKind, emit_unattributed};
use crate::signing::Signer;

pub use cookies::{Cookie, CookieJar, SameSite, has_cookie};
pub use token::{CurrentTokenCodec, LegacyTokenCodec, SessionClaims};

/// Cookie carrying the session token.
pub const SESSION_COOKIE_NAME: &str = "session";

/// Why a session could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session expired")]
    Expired,

    #[error("session user no longer exists")]
    UserNotFound,

    #[error("session user is inactive")]
    UserInactive,

    #[error("user directory lookup failed: {0}")]
    Directory(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("failed to sign session token: {0}")]
    Signing(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionError::Malformed => "malformed",
            SessionError::BadSignature => "bad_signature",
            SessionError::Expired => "expired",
            SessionError::UserNotFound => "user_not_found",
            SessionError::UserInactive => "user_inactive",
            SessionError::Directory(_) => "directory_error",
            SessionError::NoActiveSession => "no_active_session",
            SessionError::Signing(_) => "signing_failed",
        }
    }

    /// Failures that suggest a forged or corrupted cookie.
    fn is_suspicious(&self) -> bool {
        matches!(self, SessionError::Malformed | SessionError::BadSignature)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Signing(msg) => AppError::Internal(msg),
            SessionError::NoActiveSession => {
                AppError::Unauthorized("No active session".to_string())
            }
            _ => AppError::Unauthorized("Invalid session".to_string()),
        }
    }
}

/// Which codec accepted a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    Current,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub claims: SessionClaims,
    pub scheme: TokenScheme,
}

/// Outcome of [`SessionManager::get_current_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn invalid() -> Self {
        Self {
            user: None,
            is_valid: false,
            expires_at: None,
        }
    }
}

/// Result of [`SessionManager::rotate_session`]: the freshly issued claims
/// and the directory record they were re-checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatedSession {
    pub user: User,
    pub claims: SessionClaims,
}

/// Timeouts and cookie attributes.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
    pub refresh_window: Duration,
    pub secure_cookies: bool,
    pub cookie_domain: Option<String>,
    pub legacy_enabled: bool,
}

impl SessionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.session_idle_timeout,
            absolute_timeout: config.session_absolute_timeout,
            refresh_window: config.session_refresh_window,
            secure_cookies: config.environment.is_production(),
            cookie_domain: config.cookie_domain.clone(),
            legacy_enabled: config.legacy_sessions_enabled,
        }
    }
}

#[derive(Debug)]
struct Timeouts {
    idle: TimeDelta,
    absolute: TimeDelta,
    refresh: TimeDelta,
}

/// Issues, verifies, rotates and destroys sessions.
///
/// Cloning is cheap; clones share keys and the directory handle.
#[derive(Debug, Clone)]
pub struct SessionManager {
    current: Arc<CurrentTokenCodec>,
    legacy: Option<Arc<LegacyTokenCodec>>,
    csrf: CsrfGuard,
    directory: Arc<dyn UserDirectory>,
    clock: SharedClock,
    timeouts: Arc<Timeouts>,
    policy: Arc<SessionPolicy>,
}

impl SessionManager {
    /// # Errors
    ///
    /// `AppError::ConfigError` for an empty session secret or timeouts too
    /// large to represent.
    pub fn new(
        config: &Config,
        csrf: CsrfGuard,
        directory: Arc<dyn UserDirectory>,
        clock: SharedClock,
    ) -> AppResult<Self> {
        let policy = SessionPolicy::from_config(config);
        let to_delta = |d: Duration, name: &str| {
            TimeDelta::from_std(d)
                .map_err(|e| AppError::ConfigError(format!("{name} out of range: {e}")))
        };
        let timeouts = Timeouts {
            idle: to_delta(policy.idle_timeout, "SESSION_IDLE_TIMEOUT_SECS")?,
            absolute: to_delta(policy.absolute_timeout, "SESSION_ABSOLUTE_TIMEOUT_SECS")?,
            refresh: to_delta(policy.refresh_window, "SESSION_REFRESH_WINDOW_SECS")?,
        };

        let signer = Signer::new(&config.session_secret)?;
        let legacy = policy
            .legacy_enabled
            .then(|| Arc::new(LegacyTokenCodec::new(signer)));

        Ok(Self {
            current: Arc::new(CurrentTokenCodec::new(&config.session_secret)),
            legacy,
            csrf,
            directory,
            clock,
            timeouts: Arc::new(timeouts),
            policy: Arc::new(policy),
        })
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    /// Cheap presence check, no verification.
    pub fn has_session_cookie(headers: &HeaderMap) -> bool {
        has_cookie(headers, SESSION_COOKIE_NAME)
    }

    /// Mint a session for `user` and queue both cookies on `jar`.
    ///
    /// # Errors
    ///
    /// `SessionError::Signing` if the token cannot be encoded.
    pub fn create_session(
        &self,
        jar: &mut CookieJar,
        user: &User,
        remember_me: bool,
    ) -> Result<SessionClaims, SessionError> {
        let lifetime = if remember_me {
            self.timeouts.absolute
        } else {
            self.timeouts.idle
        };
        let claims = self.issue(jar, user, lifetime)?;
        info!(user_id = %user.id, remember_me, "Session created");
        Ok(claims)
    }

    /// Verify `token` with the current scheme, then the legacy one if enabled.
    ///
    /// # Errors
    ///
    /// The current scheme's error, unless the legacy codec recognised the
    /// token format and rejected it for a more specific reason.
    pub fn verify_token(&self, token: &str) -> Result<VerifiedToken, SessionError> {
        let now = self.clock.now();

        let current_err = match self.current.verify(token, now) {
            Ok(claims) => {
                return Ok(VerifiedToken {
                    claims,
                    scheme: TokenScheme::Current,
                });
            }
            Err(e) => e,
        };

        let Some(legacy) = &self.legacy else {
            return Err(current_err);
        };
        match legacy.verify(token, now) {
            Ok(claims) => {
                debug!(user_id = %claims.sub, "Session accepted via legacy token format");
                Ok(VerifiedToken {
                    claims,
                    scheme: TokenScheme::Legacy,
                })
            }
            Err(SessionError::Malformed) => Err(current_err),
            Err(legacy_err) => Err(legacy_err),
        }
    }

    /// Resolve the session carried by `jar`.
    ///
    /// Never fails: any problem destroys the session and reads as invalid.
    pub async fn get_current_session(&self, jar: &mut CookieJar) -> SessionState {
        let Some(token) = jar.get(SESSION_COOKIE_NAME).map(str::to_owned) else {
            return SessionState::invalid();
        };

        match self.resolve(&token).await {
            Ok((user, claims)) => SessionState {
                user: Some(user),
                is_valid: true,
                expires_at: claims.expires_at(),
            },
            Err(err) => {
                self.invalidate(jar, &err);
                SessionState::invalid()
            }
        }
    }

    /// Re-issue the current session with a fresh token and expiry.
    ///
    /// # Errors
    ///
    /// `SessionError::NoActiveSession` when the jar carries no valid session
    /// (any stale cookie is destroyed), `SessionError::Signing` on encode
    /// failure.
    pub async fn rotate_session(
        &self,
        jar: &mut CookieJar,
    ) -> Result<RotatedSession, SessionError> {
        let token = jar
            .get(SESSION_COOKIE_NAME)
            .map(str::to_owned)
            .ok_or(SessionError::NoActiveSession)?;

        let (user, claims) = match self.resolve(&token).await {
            Ok(resolved) => resolved,
            Err(err) => {
                self.invalidate(jar, &err);
                return Err(SessionError::NoActiveSession);
            }
        };

        let lifetime = TimeDelta::seconds(claims.exp - claims.iat)
            .clamp(TimeDelta::seconds(1), self.timeouts.absolute);
        let claims = self.issue(jar, &user, lifetime)?;
        info!(user_id = %user.id, "Session rotated");
        Ok(RotatedSession { user, claims })
    }

    /// Mint a CSRF token, queue it as the script-readable `csrf_token`
    /// cookie and return it. The cookie outlives any session it pairs with.
    pub fn issue_csrf_cookie(&self, jar: &mut CookieJar) -> String {
        self.set_csrf_cookie(jar, self.timeouts.absolute.num_seconds())
    }

    /// Clear both cookies. Idempotent.
    pub fn destroy_session(&self, jar: &mut CookieJar) {
        jar.set(self.cookie(SESSION_COOKIE_NAME, String::new(), 0, true));
        jar.set(self.cookie(CSRF_COOKIE_NAME, String::new(), 0, false));
    }

    /// Whether the session expires within the refresh window.
    ///
    /// False when there is no verifiable session at all.
    pub fn is_session_expiring_soon(&self, jar: &CookieJar) -> bool {
        let Some(token) = jar.get(SESSION_COOKIE_NAME) else {
            return false;
        };
        match self.verify_token(token) {
            Ok(verified) => {
                verified.claims.exp - self.clock.now().timestamp()
                    <= self.timeouts.refresh.num_seconds()
            }
            Err(_) => false,
        }
    }

    async fn resolve(&self, token: &str) -> Result<(User, SessionClaims), SessionError> {
        let verified = self.verify_token(token)?;

        let user = self
            .directory
            .find_by_id(&verified.claims.sub)
            .await
            .map_err(|e| SessionError::Directory(e.to_string()))?
            .ok_or(SessionError::UserNotFound)?;
        if !user.is_active {
            return Err(SessionError::UserInactive);
        }

        Ok((user, verified.claims))
    }

    fn issue(
        &self,
        jar: &mut CookieJar,
        user: &User,
        lifetime: TimeDelta,
    ) -> Result<SessionClaims, SessionError> {
        let claims = SessionClaims::new(user, self.clock.now(), lifetime);
        let token = self.current.encode(&claims)?;
        let max_age = lifetime.num_seconds();

        jar.set(self.cookie(SESSION_COOKIE_NAME, token, max_age, true));
        self.set_csrf_cookie(jar, max_age);
        Ok(claims)
    }

    fn set_csrf_cookie(&self, jar: &mut CookieJar, max_age: i64) -> String {
        let token = self.csrf.issue_token();
        jar.set(self.cookie(CSRF_COOKIE_NAME, token.clone(), max_age, false));
        token
    }

    fn invalidate(&self, jar: &mut CookieJar, err: &SessionError) {
        if err.is_suspicious() {
            emit_unattributed(SecurityEventKind::SessionInvalid, err.as_str());
        } else {
            debug!(reason = err.as_str(), "Discarding session");
        }
        self.destroy_session(jar);
    }

    fn cookie(&self, name: &str, value: String, max_age: i64, http_only: bool) -> Cookie {
        Cookie::new(name, value)
            .max_age(max_age)
            .http_only(http_only)
            .secure(self.policy.secure_cookies)
            .domain(self.policy.cookie_domain.clone())
    }
}
