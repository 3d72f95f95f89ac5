mod api;

pub use api::{
    CspReportEnvelope, CspViolation, CsrfTokenResponse, HealthResponse, LoginRequest,
    LogoutResponse, SessionResponse, UserSummary,
};
