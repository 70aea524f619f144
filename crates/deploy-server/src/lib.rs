//! Deploy Server
//!
//! REST API over the build registry: upload ZIP builds, deploy one of them
//! into the active build directory, inspect and delete them.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check (also `/health`)
//! - `GET /api/active` - Currently deployed build
//! - `GET /api/builds` - List builds (auth)
//! - `POST /api/upload` - Upload a build, multipart field `build` (auth)
//! - `POST /api/deploy/{id}` - Deploy a build (auth)
//! - `DELETE /api/builds/{id}` - Delete a build (auth)
//! - `GET /api/builds/{id}/info` - Build descriptor text (auth)

pub mod auth;
pub mod config;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use build_registry::{
    BuildRegistry, CommandReloadHook, IngestionPipeline, NoopReloadHook, ReloadHook,
    UploadPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use auth::{AuthenticatedUser, Credentials};
pub use config::Config;

/// Multipart framing allowance on top of the upload cap
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub registry: Arc<BuildRegistry>,
    pub ingestion: IngestionPipeline,
    pub credentials: Credentials,
    /// In-flight uploads are written here
    pub uploads_dir: PathBuf,
    pub dashboard_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(registry: Arc<BuildRegistry>, policy: UploadPolicy, credentials: Credentials) -> Self {
        let uploads_dir = registry.layout().uploads_dir.clone();

        Self {
            ingestion: IngestionPipeline::new(registry.clone(), policy),
            registry,
            credentials,
            uploads_dir,
            dashboard_dir: None,
        }
    }

    /// Build the state described by `config`
    pub fn from_config(config: &Config) -> Self {
        let reload_hook: Box<dyn ReloadHook> = match config
            .reload_command
            .as_deref()
            .and_then(CommandReloadHook::parse)
        {
            Some(hook) => Box::new(hook),
            None => Box::new(NoopReloadHook),
        };

        let registry = Arc::new(BuildRegistry::open(
            config.storage_layout(),
            config.activation_strategy,
            reload_hook,
        ));
        let credentials = Credentials::new(
            config.admin_user.clone(),
            config.admin_password.clone(),
            config.auth_realm.clone(),
        );

        let mut state = Self::new(registry, UploadPolicy::new(config.max_upload_bytes), credentials);
        state.dashboard_dir = config.dashboard_dir.clone();
        state
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.ingestion.policy().max_bytes + MULTIPART_OVERHEAD_BYTES;
    let dashboard_dir = state.dashboard_dir.clone();
    let shared_state = Arc::new(state);

    let protected = Router::new()
        .route("/api/builds", get(handlers::list_builds_handler))
        .route("/api/upload", post(handlers::upload_handler))
        .route("/api/deploy/{id}", post(handlers::deploy_handler))
        .route("/api/builds/{id}", delete(handlers::delete_build_handler))
        .route("/api/builds/{id}/info", get(handlers::build_info_handler))
        .route_layer(middleware::from_fn_with_state(
            shared_state.clone(),
            auth::require_basic_auth,
        ))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ));

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/api/active", get(handlers::active_handler))
        .merge(protected);

    if let Some(dir) = dashboard_dir {
        router = router.nest_service("/dashboard", ServeDir::new(dir));
    }

    router
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
