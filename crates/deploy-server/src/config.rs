//! Configuration management for the Deploy Server
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use build_registry::{ActivationStrategy, StorageLayout, MAX_UPLOAD_BYTES};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Root for builds, uploads and (by default) the active build directory
    pub data_dir: PathBuf,

    /// Directory served by the reverse proxy
    pub active_build_dir: PathBuf,

    /// Basic auth user name
    pub admin_user: String,

    /// Basic auth password
    pub admin_password: String,

    /// Realm announced in `WWW-Authenticate`
    pub auth_realm: String,

    /// Largest accepted upload, inclusive
    pub max_upload_bytes: u64,

    pub activation_strategy: ActivationStrategy,

    /// Command run after each deployment; `None` disables it
    pub reload_command: Option<String>,

    /// Static dashboard served under `/dashboard`
    pub dashboard_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let data_dir: PathBuf = env::var("DATA_DIR").unwrap_or_else(|_| ".".to_string()).into();

        let config = Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("Invalid PORT")?,

            active_build_dir: env::var("ACTIVE_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("active-build")),

            data_dir,

            admin_user: env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string()),

            admin_password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string()),

            auth_realm: env::var("AUTH_REALM")
                .unwrap_or_else(|_| "Build Deployment Server".to_string()),

            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| MAX_UPLOAD_BYTES.to_string())
                .parse()
                .context("Invalid MAX_UPLOAD_BYTES")?,

            activation_strategy: env::var("ACTIVATION_MODE")
                .unwrap_or_else(|_| "clear".to_string())
                .parse::<ActivationStrategy>()
                .map_err(anyhow::Error::msg)
                .context("Invalid ACTIVATION_MODE")?,

            reload_command: Some(
                env::var("RELOAD_COMMAND").unwrap_or_else(|_| "nginx -s reload".to_string()),
            )
            .filter(|cmd| !cmd.trim().is_empty()),

            dashboard_dir: env::var("DASHBOARD_DIR").ok().map(PathBuf::from),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("PORT must be greater than 0");
        }

        if self.admin_user.is_empty() || self.admin_password.is_empty() {
            anyhow::bail!("ADMIN_USER and ADMIN_PASSWORD must not be empty");
        }

        if self.admin_user.contains(':') {
            anyhow::bail!("ADMIN_USER must not contain ':'");
        }

        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// On-disk layout derived from the configured directories
    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            active_dir: self.active_build_dir.clone(),
            ..StorageLayout::under(&self.data_dir)
        }
    }

    /// Ensure data directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let layout = self.storage_layout();
        layout
            .ensure()
            .with_context(|| format!("Failed to create data directories under {}", self.data_dir.display()))?;

        if let Some(dashboard) = &self.dashboard_dir {
            if !dashboard.exists() {
                tracing::warn!("Dashboard directory does not exist: {}", dashboard.display());
            }
        }

        Ok(())
    }
}
