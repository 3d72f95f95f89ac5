//! End-to-end tests against the real router on an ephemeral port.
//!
//! Each test boots its own server with a fresh in-memory user directory and a
//! `ManualClock`, so time-dependent session behaviour is driven by advancing
//! the clock instead of sleeping.
//!
//! Run with: `cargo test --test integration_tests`
//!
//! Cookies are handled by hand: every test reads `Set-Cookie` from the
//! response and sends the values it needs back in a `Cookie` header.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_SECURITY_POLICY, COOKIE, LOCATION, RETRY_AFTER,
    SET_COOKIE,
};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::sleep;

use edge_guard::{
    AppState, Config, Environment, InMemoryUserDirectory, ManualClock, User, UserRole,
    build_router,
};

const ADMIN_EMAIL: &str = "admin@example.com";
const ADMIN_PASSWORD: &str = "correct horse battery staple";
const USER_EMAIL: &str = "user@example.com";
const USER_PASSWORD: &str = "hunter2hunter2";

/// Test fixture that owns a running app server.
struct TestFixture {
    base_url: String,
    client: Client,
    clock: ManualClock,
    directory: Arc<InMemoryUserDirectory>,
    state: AppState,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_environment(Environment::Test).await
    }

    async fn with_environment(environment: Environment) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        let config = Config {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            environment,
            cors_allowed_origins: vec!["https://app.example.com".to_string()],
            metrics_port: 0,
            log_level: "warn".to_string(),
            ..Config::default()
        };

        let directory = Arc::new(InMemoryUserDirectory::new());
        directory
            .insert(
                user("admin-1", ADMIN_EMAIL, "Ada Admin", UserRole::Admin),
                ADMIN_PASSWORD,
            )
            .expect("Failed to seed admin");
        directory
            .insert(
                user("user-1", USER_EMAIL, "Uma User", UserRole::User),
                USER_PASSWORD,
            )
            .expect("Failed to seed user");

        let clock = ManualClock::default();
        let state = AppState::with_clock(config, directory.clone(), Arc::new(clock.clone()))
            .expect("Failed to build state");
        let app = build_router(state.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        // Redirects are asserted, never followed
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        let fixture = Self {
            base_url: format!("http://{addr}"),
            client,
            clock,
            directory,
            state,
        };
        fixture.wait_for_server().await;
        fixture
    }

    /// Wait for the server to become ready.
    async fn wait_for_server(&self) {
        let max_attempts = 50;
        for attempt in 1..=max_attempts {
            if let Ok(response) = self.client.get(self.url("/health")).send().await
                && response.status().is_success()
            {
                return;
            }
            if attempt == max_attempts {
                panic!("Server failed to respond after {max_attempts} attempts");
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in and return the `session` cookie value.
    async fn login(&self, email: &str, password: &str, remember_me: bool) -> String {
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password, "remember_me": remember_me }))
            .send()
            .await
            .expect("Login request failed");
        assert_eq!(response.status(), StatusCode::OK);
        cookie_value(&response, "session").expect("login sets a session cookie")
    }

    async fn session_status(&self, session: &str) -> Value {
        self.client
            .get(self.url("/api/auth/session"))
            .header(COOKIE, format!("session={session}"))
            .send()
            .await
            .expect("Session request failed")
            .json()
            .await
            .expect("Session body is JSON")
    }
}

fn user(id: &str, email: &str, name: &str, role: UserRole) -> User {
    User {
        id: id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role,
        is_active: true,
    }
}

/// Full `Set-Cookie` line for `name`.
fn set_cookie_line(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|line| line.starts_with(&prefix))
        .map(str::to_string)
}

/// Value of cookie `name` as set by `response`.
fn cookie_value(response: &Response, name: &str) -> Option<String> {
    let line = set_cookie_line(response, name)?;
    let pair = line.split(';').next()?;
    pair.split_once('=').map(|(_, value)| value.to_string())
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Health & Headers
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/api/health"))
        .send()
        .await
        .expect("Health request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "test");
}

#[tokio::test]
async fn test_security_headers_on_every_response() {
    let fixture = TestFixture::new().await;

    let response = fixture.client.get(fixture.url("/health")).send().await.unwrap();

    assert_eq!(header(&response, "x-frame-options"), Some("DENY"));
    assert_eq!(header(&response, "x-content-type-options"), Some("nosniff"));
    assert_eq!(
        header(&response, "referrer-policy"),
        Some("strict-origin-when-cross-origin")
    );
    assert_eq!(
        header(&response, "cross-origin-opener-policy"),
        Some("same-origin")
    );
    assert!(header(&response, "permissions-policy").is_some());
    assert!(header(&response, "strict-transport-security").is_none());
    assert!(header(&response, "x-request-id").is_some());
    assert_eq!(header(&response, "x-rate-limit-limit"), Some("100"));

    let csp = header(&response, CONTENT_SECURITY_POLICY.as_str()).unwrap();
    assert!(csp.contains("'nonce-"));
    assert!(!csp.contains("'unsafe-inline'"));
}

#[tokio::test]
async fn test_hsts_only_in_production() {
    let fixture = TestFixture::with_environment(Environment::Production).await;

    let response = fixture.client.get(fixture.url("/health")).send().await.unwrap();

    assert!(
        header(&response, "strict-transport-security")
            .unwrap()
            .contains("max-age=")
    );
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/api/nowhere"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&response, "x-frame-options"), Some("DENY"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_rate_limit_denies_101st_request() {
    let fixture = TestFixture::new().await;
    let client_ip = "198.51.100.7";

    for i in 0..100 {
        let response = fixture
            .client
            .get(fixture.url("/health"))
            .header("x-forwarded-for", client_ip)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} denied", i + 1);
    }

    let response = fixture
        .client
        .get(fixture.url("/health"))
        .header("x-forwarded-for", client_ip)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = header(&response, RETRY_AFTER.as_str())
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(header(&response, "x-rate-limit-remaining"), Some("0"));
    // Still hardened
    assert_eq!(header(&response, "x-frame-options"), Some("DENY"));

    // A different client is unaffected
    let other = fixture
        .client
        .get(fixture.url("/health"))
        .header("x-forwarded-for", "198.51.100.8")
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_window_resets() {
    let fixture = TestFixture::new().await;
    let client_ip = "198.51.100.9";

    for _ in 0..101 {
        fixture
            .client
            .get(fixture.url("/health"))
            .header("x-forwarded-for", client_ip)
            .send()
            .await
            .unwrap();
    }

    fixture.clock.advance(TimeDelta::seconds(901));

    let response = fixture
        .client
        .get(fixture.url("/health"))
        .header("x-forwarded-for", client_ip)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-rate-limit-remaining"), Some("99"));
}

#[tokio::test]
async fn test_strict_prefix_uses_higher_ceiling() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/api/auth/session"))
        .header("x-forwarded-for", "198.51.100.10")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-rate-limit-limit"), Some("1000"));
}

// ============================================================================
// CSRF
// ============================================================================

#[tokio::test]
async fn test_csrf_missing_token_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/items"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "csrf_token_missing");
}

#[tokio::test]
async fn test_csrf_invalid_token_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .delete(fixture.url("/api/items/1"))
        .header("x-csrf-token", "forged.1700000000.c2lnbmF0dXJl")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "csrf_token_invalid");
    assert_eq!(body["message"], "Invalid CSRF token");
}

#[tokio::test]
async fn test_csrf_issued_token_passes_check() {
    let fixture = TestFixture::new().await;

    let issued = fixture
        .client
        .get(fixture.url("/api/auth/csrf"))
        .send()
        .await
        .unwrap();
    assert_eq!(issued.status(), StatusCode::OK);
    let cookie = cookie_value(&issued, "csrf_token").unwrap();
    let body: Value = issued.json().await.unwrap();
    let token = body["csrf_token"].as_str().unwrap().to_string();
    assert_eq!(cookie, token);

    // Past the CSRF check, the request falls through to the 404 fallback
    let response = fixture
        .client
        .post(fixture.url("/api/items"))
        .header("csrf-token", &token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_csrf_token_expires_with_absolute_timeout() {
    let fixture = TestFixture::new().await;
    let token = fixture.state.csrf.issue_token();

    fixture.clock.advance(TimeDelta::days(8));

    let response = fixture
        .client
        .post(fixture.url("/api/items"))
        .header("x-xsrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_auth_routes_are_csrf_exempt() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/logout"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// CORS
// ============================================================================

#[tokio::test]
async fn test_preflight_allowed_in_development_for_any_origin() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .request(Method::OPTIONS, fixture.url("/api/items"))
        .header("origin", "https://unknown.example.net")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, ACCESS_CONTROL_ALLOW_ORIGIN.as_str()),
        Some("https://unknown.example.net")
    );
}

#[tokio::test]
async fn test_preflight_rejected_in_production_for_unlisted_origin() {
    let fixture = TestFixture::with_environment(Environment::Production).await;

    let rejected = fixture
        .client
        .request(Method::OPTIONS, fixture.url("/api/items"))
        .header("origin", "https://evil.example.net")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    assert!(header(&rejected, ACCESS_CONTROL_ALLOW_ORIGIN.as_str()).is_none());

    let allowed = fixture
        .client
        .request(Method::OPTIONS, fixture.url("/api/items"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(
        header(&allowed, ACCESS_CONTROL_ALLOW_ORIGIN.as_str()),
        Some("https://app.example.com")
    );
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_login_sets_hardened_session_cookie() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": USER_EMAIL, "password": USER_PASSWORD }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let line = set_cookie_line(&response, "session").unwrap();
    assert!(line.contains("HttpOnly"));
    assert!(line.contains("SameSite=Strict"));
    assert!(line.contains("Path=/"));
    assert!(line.contains("Max-Age=86400"));
    assert!(set_cookie_line(&response, "csrf_token").is_some());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["email"], USER_EMAIL);
    assert_eq!(body["user"]["role"], "user");
}

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": USER_EMAIL, "password": "wrong" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_line(&response, "session").is_none());
}

#[tokio::test]
async fn test_session_status_round_trip() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;

    let body = fixture.session_status(&session).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["id"], "user-1");
    assert_eq!(body["expiring_soon"], false);
}

#[tokio::test]
async fn test_session_idle_timeout_vs_remember_me() {
    let fixture = TestFixture::new().await;
    let short = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;
    let long = fixture.login(USER_EMAIL, USER_PASSWORD, true).await;

    fixture.clock.advance(TimeDelta::hours(25));

    assert_eq!(fixture.session_status(&short).await["authenticated"], false);
    assert_eq!(fixture.session_status(&long).await["authenticated"], true);

    fixture.clock.advance(TimeDelta::days(7));
    assert_eq!(fixture.session_status(&long).await["authenticated"], false);
}

#[tokio::test]
async fn test_session_rotates_when_expiring_soon() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;

    fixture
        .clock
        .advance(TimeDelta::hours(24) - TimeDelta::minutes(10));

    let response = fixture
        .client
        .get(fixture.url("/api/auth/session"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();
    let rotated = cookie_value(&response, "session").unwrap();
    assert_ne!(rotated, session);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["rotated"], true);

    // The new token outlives the old one
    fixture.clock.advance(TimeDelta::hours(1));
    assert_eq!(fixture.session_status(&rotated).await["authenticated"], true);
    assert_eq!(fixture.session_status(&session).await["authenticated"], false);
}

#[tokio::test]
async fn test_tampered_session_is_cleared() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;
    let tampered = format!("{session}x");

    let response = fixture
        .client
        .get(fixture.url("/api/auth/session"))
        .header(COOKIE, format!("session={tampered}"))
        .send()
        .await
        .unwrap();

    let cleared = set_cookie_line(&response, "session").unwrap();
    assert!(cleared.contains("Max-Age=0"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn test_rotate_returns_current_user() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/rotate"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(cookie_value(&response, "session").unwrap(), session);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["rotated"], true);
    assert_eq!(body["user"]["id"], "user-1");
    assert_eq!(body["user"]["email"], USER_EMAIL);
}

#[tokio::test]
async fn test_rotate_without_session_is_unauthorized() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/rotate"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;

    let response = fixture
        .client
        .post(fixture.url("/api/auth/logout"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        set_cookie_line(&response, "session")
            .unwrap()
            .contains("Max-Age=0")
    );
    assert!(
        set_cookie_line(&response, "csrf_token")
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn test_deactivated_user_session_is_invalid() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;
    assert_eq!(fixture.session_status(&session).await["authenticated"], true);

    assert!(fixture.directory.set_active("user-1", false));

    assert_eq!(fixture.session_status(&session).await["authenticated"], false);
    let response = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "email": USER_EMAIL, "password": USER_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Admin Gate
// ============================================================================

#[tokio::test]
async fn test_admin_without_cookie_redirects_to_login() {
    let fixture = TestFixture::new().await;

    let response = fixture.client.get(fixture.url("/admin")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        header(&response, LOCATION.as_str()),
        Some("/login?redirect=/admin")
    );
}

#[tokio::test]
async fn test_admin_with_forged_cookie_redirects_and_clears() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .get(fixture.url("/admin"))
        .header(COOKIE, "session=not-a-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(
        set_cookie_line(&response, "session")
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn test_admin_with_expired_session_redirects_and_clears() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(ADMIN_EMAIL, ADMIN_PASSWORD, false).await;

    fixture.clock.advance(TimeDelta::hours(24) + TimeDelta::seconds(1));

    let response = fixture
        .client
        .get(fixture.url("/admin"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        header(&response, LOCATION.as_str()),
        Some("/login?redirect=/admin")
    );
    assert!(
        set_cookie_line(&response, "session")
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn test_admin_rejects_non_admin() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(USER_EMAIL, USER_PASSWORD, false).await;

    let response = fixture
        .client
        .get(fixture.url("/admin"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_dashboard_uses_request_nonce() {
    let fixture = TestFixture::new().await;
    let session = fixture.login(ADMIN_EMAIL, ADMIN_PASSWORD, false).await;

    let response = fixture
        .client
        .get(fixture.url("/admin"))
        .header(COOKIE, format!("session={session}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let csp = header(&response, CONTENT_SECURITY_POLICY.as_str())
        .unwrap()
        .to_string();
    let html = response.text().await.unwrap();

    let start = csp.find("'nonce-").unwrap() + "'nonce-".len();
    let nonce = &csp[start..start + csp[start..].find('\'').unwrap()];
    assert!(html.contains(&format!("<script nonce=\"{nonce}\">")));
    assert!(html.contains("Ada Admin"));
}

// ============================================================================
// CSP Reports
// ============================================================================

#[tokio::test]
async fn test_csp_report_accepted() {
    let fixture = TestFixture::new().await;

    let report = json!({
        "csp-report": {
            "document-uri": "https://app.example.com/admin",
            "violated-directive": "script-src",
            "blocked-uri": "https://evil.example.net/x.js"
        }
    });
    let response = fixture
        .client
        .post(fixture.url("/api/security/csp-report"))
        .header("content-type", "application/csp-report")
        .body(report.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_csp_report_rejects_garbage() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .client
        .post(fixture.url("/api/security/csp-report"))
        .body("not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
