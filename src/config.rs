//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Environment
//!
//! `APP_ENV` selects the [`Environment`]. It is resolved once here and threaded
//! explicitly into every component that behaves differently in production
//! (CSP fallback, CORS fail-open, HSTS, `Secure` cookies). Nothing reads the
//! environment at the point of use.
//!
//! # Secrets
//!
//! - `SESSION_SECRET`: HMAC key for session tokens (required in production)
//! - `CSRF_SECRET`: HMAC key for CSRF tokens (required in production)
//!
//! Outside production a missing secret is replaced by a random per-process
//! value. Tokens signed with it stop verifying after a restart.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_SECS`: Fixed window length (default: 900)
//! - `RATE_LIMIT_MAX`: Ceiling for standard routes (default: 100)
//! - `RATE_LIMIT_STRICT_MAX`: Ceiling for strict prefixes (default: 1000)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Minimum accepted secret length in production.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for every configured duration (ten years).
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(AppError::ConfigError(format!("Invalid APP_ENV: {other}"))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret key material. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Random 32-byte secret, base64url encoded.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
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

    /// Deployment environment (default: development)
    pub environment: Environment,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed origins in production (exact match)
    pub cors_allowed_origins: Vec<String>,

    /// Additional origins allowed outside production.
    /// Localhost origins on any port are always allowed outside production.
    pub cors_dev_origins: Vec<String>,

    // =========================================================================
    // CSRF / CSP Configuration
    // =========================================================================
    /// CSRF signing secret
    pub csrf_secret: Secret,

    /// Strict nonce-based CSP when true, permissive fallback when false
    pub csp_enabled: bool,

    /// `report-uri` directive target
    pub csp_report_uri: String,

    // =========================================================================
    // Session Configuration
    // =========================================================================
    /// Session token signing secret
    pub session_secret: Secret,

    /// Lifetime of a session created without "remember me" (default: 24h)
    pub session_idle_timeout: Duration,

    /// Lifetime of a "remember me" session (default: 7 days)
    pub session_absolute_timeout: Duration,

    /// Lookahead for `is_session_expiring_soon` (default: 30 minutes)
    pub session_refresh_window: Duration,

    /// Accept tokens in the pre-JWT compact format
    pub legacy_sessions_enabled: bool,

    /// `Domain=` attribute for session cookies
    pub cookie_domain: Option<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Fixed window length (default: 15 minutes)
    pub rate_limit_window: Duration,

    /// Ceiling for standard routes (default: 100)
    pub rate_limit_max: u32,

    /// Ceiling for routes under `rate_limit_strict_prefixes` (default: 1000)
    pub rate_limit_strict_max: u32,

    /// Path prefixes that use the strict ceiling
    pub rate_limit_strict_prefixes: Vec<String>,

    // =========================================================================
    // Route Gating
    // =========================================================================
    /// Path prefixes that require a session cookie (default: ["/admin"])
    pub protected_path_prefixes: Vec<String>,

    /// Where unauthenticated requests to protected paths are sent
    pub login_path: String,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value cannot be parsed or the
    /// resulting configuration is inconsistent (see [`Config::validate`]).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment: Environment = match env::var("APP_ENV") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::Development,
        };

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment,

            // CORS
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", ""),
            cors_dev_origins: Self::parse_list(
                "CORS_DEV_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            ),

            // CSRF / CSP
            csrf_secret: Self::parse_secret("CSRF_SECRET", environment)?,
            csp_enabled: Self::parse_env("CSP_ENABLED", true)?,
            csp_report_uri: env::var("CSP_REPORT_URI")
                .unwrap_or_else(|_| "/api/security/csp-report".to_string()),

            // Sessions
            session_secret: Self::parse_secret("SESSION_SECRET", environment)?,
            session_idle_timeout: Duration::from_secs(Self::parse_env(
                "SESSION_IDLE_TIMEOUT_SECS",
                24 * 60 * 60,
            )?),
            session_absolute_timeout: Duration::from_secs(Self::parse_env(
                "SESSION_ABSOLUTE_TIMEOUT_SECS",
                7 * 24 * 60 * 60,
            )?),
            session_refresh_window: Duration::from_secs(Self::parse_env(
                "SESSION_REFRESH_WINDOW_SECS",
                30 * 60,
            )?),
            legacy_sessions_enabled: Self::parse_env("LEGACY_SESSIONS_ENABLED", true)?,
            cookie_domain: env::var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty()),

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_WINDOW_SECS",
                15 * 60,
            )?),
            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 100)?,
            rate_limit_strict_max: Self::parse_env("RATE_LIMIT_STRICT_MAX", 1000)?,
            rate_limit_strict_prefixes: Self::parse_paths(
                "RATE_LIMIT_STRICT_PREFIXES",
                "/api/auth,/api/admin",
            ),

            // Route gating
            protected_path_prefixes: Self::parse_paths("PROTECTED_PATH_PREFIXES", "/admin"),
            login_path: env::var("LOGIN_PATH").unwrap_or_else(|_| "/login".to_string()),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.environment.is_production() {
            for (name, secret) in [
                ("SESSION_SECRET", &self.session_secret),
                ("CSRF_SECRET", &self.csrf_secret),
            ] {
                if secret.len() < MIN_SECRET_LEN {
                    return Err(AppError::ConfigError(format!(
                        "{name} must be at least {MIN_SECRET_LEN} bytes in production"
                    )));
                }
            }
        } else if self.session_secret.is_empty() || self.csrf_secret.is_empty() {
            return Err(AppError::ConfigError(
                "SESSION_SECRET and CSRF_SECRET must not be empty".to_string(),
            ));
        }

        if self.session_idle_timeout.is_zero() || self.session_absolute_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "Session timeouts must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("SESSION_IDLE_TIMEOUT_SECS", self.session_idle_timeout),
            ("SESSION_ABSOLUTE_TIMEOUT_SECS", self.session_absolute_timeout),
            ("SESSION_REFRESH_WINDOW_SECS", self.session_refresh_window),
            ("RATE_LIMIT_WINDOW_SECS", self.rate_limit_window),
        ] {
            if value > MAX_DURATION {
                return Err(AppError::ConfigError(format!(
                    "{name} must be at most {} seconds",
                    MAX_DURATION.as_secs()
                )));
            }
        }

        if self.session_idle_timeout > self.session_absolute_timeout {
            return Err(AppError::ConfigError(format!(
                "SESSION_IDLE_TIMEOUT_SECS ({:?}) must be <= SESSION_ABSOLUTE_TIMEOUT_SECS ({:?})",
                self.session_idle_timeout, self.session_absolute_timeout
            )));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max == 0 || self.rate_limit_strict_max == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX and RATE_LIMIT_STRICT_MAX must be greater than 0".to_string(),
            ));
        }

        if !self.login_path.starts_with('/') {
            return Err(AppError::ConfigError(format!(
                "LOGIN_PATH must start with '/': {}",
                self.login_path
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
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
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

    /// Read a secret, generating a per-process one outside production.
    fn parse_secret(name: &str, environment: Environment) -> AppResult<Secret> {
        match env::var(name).ok().filter(|s| !s.is_empty()) {
            Some(value) => Ok(Secret::new(value)),
            None if environment.is_production() => Err(AppError::ConfigError(format!(
                "{name} is required in production"
            ))),
            None => {
                warn!(
                    variable = name,
                    "Secret not configured, using a random per-process value"
                );
                Ok(Secret::random())
            }
        }
    }

    /// Parse a comma-separated list from an environment variable.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }

    /// Parse a comma-separated list of absolute paths.
    fn parse_paths(name: &str, default: &str) -> Vec<String> {
        Self::parse_list(name, default)
            .into_iter()
            .filter(|p| p.starts_with('/'))
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
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
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            // CORS
            cors_allowed_origins: vec![],
            cors_dev_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            // CSRF / CSP
            csrf_secret: Secret::new("development-csrf-secret-change-me-0123456789"),
            csp_enabled: true,
            csp_report_uri: "/api/security/csp-report".to_string(),
            // Sessions
            session_secret: Secret::new("development-session-secret-change-me-01234"),
            session_idle_timeout: Duration::from_secs(24 * 60 * 60),
            session_absolute_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            session_refresh_window: Duration::from_secs(30 * 60),
            legacy_sessions_enabled: true,
            cookie_domain: None,
            // Rate limiting
            rate_limit_window: Duration::from_secs(15 * 60),
            rate_limit_max: 100,
            rate_limit_strict_max: 1000,
            rate_limit_strict_prefixes: vec!["/api/auth".to_string(), "/api/admin".to_string()],
            // Route gating
            protected_path_prefixes: vec!["/admin".to_string()],
            login_path: "/login".to_string(),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
