//! Deploy Server
//!
//! REST API for uploading and deploying build archives

use anyhow::{Context, Result};
use deploy_server::{create_router, AppState, Config};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "deploy_server=debug,build_registry=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Deploy Server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Ensure directories exist
    config
        .ensure_directories()
        .context("Failed to create directories")?;

    let layout = config.storage_layout();
    info!("Builds directory: {}", layout.builds_root.display());
    info!("Active build directory: {}", layout.active_dir.display());
    info!("Activation mode: {}", config.activation_strategy);
    match &config.reload_command {
        Some(cmd) => info!("Reload command: {}", cmd),
        None => info!("Reload command disabled"),
    }

    // Create application state
    let state = AppState::from_config(&config);

    // Create router
    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Deploy Server listening on http://{}", config.api_address());
    if config.dashboard_dir.is_some() {
        info!("Dashboard: http://{}/dashboard", config.api_address());
    }
    info!("API endpoints:");
    info!("  GET  /api/health - Health check");
    info!("  GET  /api/builds - List builds");
    info!("  POST /api/upload - Upload build");
    info!("  POST /api/deploy/{{id}} - Deploy build");
    info!("  DELETE /api/builds/{{id}} - Delete build");
    info!("  GET  /api/active - Active build");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
