//! Administrator dashboard.
//!
//! The security layer has already redirected requests without a `session`
//! cookie. This handler does the full check: the session must verify and
//! belong to an active admin. An invalid session is cleared and redirected
//! to the login page; a valid non-admin session gets 403.

use axum::extract::{Extension, OriginalUri, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use tracing::instrument;

use crate::directory::User;
use crate::error::AppError;
use crate::middleware::csp::CspNonce;
use crate::middleware::events::{RequestContext, SecurityEventKind};
use crate::session::CookieJar;
use crate::state::AppState;

#[instrument(skip_all)]
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(nonce): Extension<CspNonce>,
    Extension(ctx): Extension<RequestContext>,
    OriginalUri(uri): OriginalUri,
    mut jar: CookieJar,
) -> Response {
    let session = state.sessions.get_current_session(&mut jar).await;

    match session.user {
        Some(user) if session.is_valid && user.role.is_admin() => {
            (jar, Html(render_dashboard(&user, &nonce))).into_response()
        }
        Some(_) => {
            ctx.emit_with_detail(SecurityEventKind::AdminRedirect, "not an administrator");
            (
                jar,
                AppError::Forbidden("Administrator role required".to_string()),
            )
                .into_response()
        }
        None => {
            ctx.emit_with_detail(SecurityEventKind::AdminRedirect, "session invalid");
            let location = state.gate.login_location(uri.path());
            (jar, Redirect::temporary(&location)).into_response()
        }
    }
}

fn render_dashboard(user: &User, nonce: &CspNonce) -> String {
    format!(
        "<!doctype html>\n<html><head><title>Admin</title>\
         <style nonce=\"{nonce}\">body{{font-family:sans-serif}}</style></head>\
         <body><h1>Administration</h1><p>Signed in as {}</p>\
         <script nonce=\"{nonce}\">document.body.dataset.ready = \"1\";</script>\
         </body></html>",
        escape_html(&user.name)
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserRole;

    #[test]
    fn test_dashboard_embeds_nonce_and_escapes_name() {
        let user = User {
            id: "1".into(),
            email: "a@example.com".into(),
            name: "<b>Eve</b>".into(),
            role: UserRole::Admin,
            is_active: true,
        };
        let nonce = CspNonce::generate();
        let html = render_dashboard(&user, &nonce);

        assert_eq!(html.matches(&format!("nonce=\"{nonce}\"")).count(), 2);
        assert!(html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
    }
}
