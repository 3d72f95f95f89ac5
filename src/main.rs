use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use edge_guard::{
    AppState, Config, InMemoryUserDirectory, User, UserRole, build_router, metrics, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Edge Guard v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.environment,
        log_level = %config.log_level,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    // Seed the user directory
    let directory = Arc::new(InMemoryUserDirectory::new());
    seed_admin(&directory).map_err(|e| {
        error!("Failed to seed admin user: {e}");
        exitcode::CONFIG
    })?;

    // Build application state and router
    let state = AppState::new(config.clone(), directory).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health                   - Health check");
    info!("  GET  /api/auth/csrf            - Issue CSRF token");
    info!("  POST /api/auth/login           - Log in");
    info!("  POST /api/auth/logout          - Log out");
    info!("  GET  /api/auth/session         - Current session");
    info!("  POST /api/auth/rotate          - Rotate session token");
    info!("  POST /api/security/csp-report  - CSP violation reports");
    info!("  GET  /admin                    - Admin dashboard");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            exitcode::SOFTWARE
        })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Insert the administrator named by `ADMIN_EMAIL`/`ADMIN_PASSWORD`, if set.
fn seed_admin(directory: &InMemoryUserDirectory) -> edge_guard::AppResult<()> {
    let (Ok(email), Ok(password)) = (
        std::env::var("ADMIN_EMAIL"),
        std::env::var("ADMIN_PASSWORD"),
    ) else {
        warn!("ADMIN_EMAIL/ADMIN_PASSWORD not set; starting with an empty user directory");
        return Ok(());
    };

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.clone(),
        name: "Administrator".to_string(),
        role: UserRole::Admin,
        is_active: true,
    };
    directory.insert(user, &password)?;
    info!(%email, "Seeded admin user");
    Ok(())
}
