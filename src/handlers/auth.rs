//! Authentication endpoints.
//!
//! # Endpoints
//!
//! - `GET /api/auth/csrf` - Issue a CSRF token (body + `csrf_token` cookie)
//! - `POST /api/auth/login` - Verify credentials and create a session
//! - `POST /api/auth/logout` - Destroy the session
//! - `GET /api/auth/session` - Current session; rotates it when expiring soon
//! - `POST /api/auth/rotate` - Force a rotation
//!
//! All of `/api/auth/` is CSRF-exempt: these calls happen before a token
//! exists or replace it.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::{
    CsrfTokenResponse, LoginRequest, LogoutResponse, SessionResponse, UserSummary,
};
use crate::session::CookieJar;
use crate::state::AppState;

/// Issue a CSRF token.
#[instrument(skip_all)]
pub async fn issue_csrf(
    State(state): State<AppState>,
    mut jar: CookieJar,
) -> (CookieJar, Json<CsrfTokenResponse>) {
    let csrf_token = state.sessions.issue_csrf_cookie(&mut jar);
    (jar, Json(CsrfTokenResponse { csrf_token }))
}

/// Log in with email and password.
///
/// # Errors
///
/// 401 for unknown email, wrong password or an inactive account, without
/// saying which.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    mut jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }

    let Some(user) = state
        .directory()
        .verify_credentials(&body.email, &body.password)
        .await?
    else {
        info!("Login rejected");
        return Err(AppError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    };

    let claims = state
        .sessions
        .create_session(&mut jar, &user, body.remember_me)?;

    Ok((
        jar,
        Json(SessionResponse {
            authenticated: true,
            user: Some(UserSummary::from(&user)),
            expires_at: claims.expires_at(),
            expiring_soon: false,
            rotated: false,
        }),
    ))
}

/// Destroy the session. Succeeds with or without one.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    mut jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    state.sessions.destroy_session(&mut jar);
    (jar, Json(LogoutResponse { success: true }))
}

/// Report the current session, rotating it when it is about to expire.
#[instrument(skip_all)]
pub async fn session_status(
    State(state): State<AppState>,
    mut jar: CookieJar,
) -> (CookieJar, Json<SessionResponse>) {
    let session = state.sessions.get_current_session(&mut jar).await;
    if !session.is_valid {
        return (jar, Json(SessionResponse::anonymous()));
    }

    let mut response = SessionResponse {
        authenticated: true,
        user: session.user.as_ref().map(UserSummary::from),
        expires_at: session.expires_at,
        expiring_soon: state.sessions.is_session_expiring_soon(&jar),
        rotated: false,
    };

    if response.expiring_soon {
        match state.sessions.rotate_session(&mut jar).await {
            Ok(rotated) => {
                response.rotated = true;
                response.expires_at = rotated.claims.expires_at();
            }
            Err(e) => warn!(error = %e, "Proactive session rotation failed"),
        }
    }

    (jar, Json(response))
}

/// Re-issue the session token.
///
/// Responds 401 (and clears any stale cookie) without a valid session.
#[instrument(skip_all)]
pub async fn rotate(State(state): State<AppState>, mut jar: CookieJar) -> Response {
    match state.sessions.rotate_session(&mut jar).await {
        Ok(rotated) => {
            let body = SessionResponse {
                authenticated: true,
                user: Some(UserSummary::from(&rotated.user)),
                expires_at: rotated.claims.expires_at(),
                expiring_soon: false,
                rotated: true,
            };
            (jar, Json(body)).into_response()
        }
        Err(e) => (jar, AppError::from(e)).into_response(),
    }
}
