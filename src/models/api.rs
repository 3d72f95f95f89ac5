use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::{User, UserRole};

/// Login credentials.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Use the absolute timeout instead of the idle timeout
    #[serde(default)]
    pub remember_me: bool,
}

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Session status returned by login, verify and rotate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Expires within the refresh window
    #[serde(default)]
    pub expiring_soon: bool,
    /// A fresh token was issued with this response
    #[serde(default)]
    pub rotated: bool,
}

impl SessionResponse {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            user: None,
            expires_at: None,
            expiring_soon: false,
            rotated: false,
        }
    }
}

/// Freshly issued CSRF token. Also set as the `csrf_token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// Logout acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" when the process can answer
    pub status: String,
    pub environment: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Live rate-limit windows
    pub rate_limit_windows: usize,
    pub timestamp: DateTime<Utc>,
}

/// Browser CSP violation report (`application/csp-report`).
#[derive(Debug, Clone, Deserialize)]
pub struct CspReportEnvelope {
    #[serde(rename = "csp-report")]
    pub report: CspViolation,
}

/// Body of a CSP violation report. Browsers omit fields freely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CspViolation {
    pub document_uri: Option<String>,
    pub violated_directive: Option<String>,
    pub effective_directive: Option<String>,
    pub blocked_uri: Option<String>,
    pub source_file: Option<String>,
    pub line_number: Option<u64>,
    pub disposition: Option<String>,
}
