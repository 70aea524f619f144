//! API handlers for the Deploy Server

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use build_registry::{BuildRecord, PendingUpload, Registry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::{auth::AuthenticatedUser, AppState};

/// Multipart field carrying the archive
pub const UPLOAD_FIELD: &str = "build";

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
    /// Set when a deployment left the active directory empty
    pub degraded: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            degraded: false,
        }
    }

    fn internal(message: impl Into<String>, details: impl ToString) -> Self {
        Self {
            details: Some(details.to_string()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                "{} ({})",
                self.message,
                self.details.as_deref().unwrap_or("no details")
            );
        }

        let mut body = serde_json::json!({
            "error": self.message
        });
        if let Some(details) = self.details {
            body["details"] = details.into();
        }
        if self.degraded {
            body["degraded"] = true.into();
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<build_registry::Error> for ApiError {
    fn from(err: build_registry::Error) -> Self {
        use build_registry::Error;

        let status = match &err {
            Error::Validation(_) | Error::Conflict(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Storage { .. } | Error::Extract { .. } | Error::ActivationDegraded { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Server-side paths stay in the logs
        let message = match &err {
            Error::Storage { .. } => {
                error!("{}: {}", err, err.details().unwrap_or_default());
                "Storage operation failed".to_string()
            }
            Error::Extract { .. } => {
                error!("{}: {}", err, err.details().unwrap_or_default());
                "Failed to extract archive".to_string()
            }
            _ => err.to_string(),
        };

        ApiError {
            status,
            message,
            details: err.details(),
            degraded: err.is_degraded(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), err.body_text())
    }
}

/// Run registry work on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> build_registry::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal("Background task failed", e))?
        .map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub build: BuildRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    pub message: String,
    pub build_id: String,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveResponse {
    pub active: bool,
    pub build: Option<BuildRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// List all builds
pub async fn list_builds_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Registry>, ApiError> {
    let registry = state.registry.clone();
    let builds = run_blocking(move || Ok(registry.list())).await?;

    Ok(Json(builds))
}

/// Receive a new build archive
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let policy = state.ingestion.policy();
    let mut received = None;

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        policy.check_filename(&filename)?;

        // Stream into the uploads directory; nothing reaches the builds root
        // until the upload passed every check
        let tmp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&state.uploads_dir)
            .map_err(|e| ApiError::internal("Failed to store upload", e))?;
        let std_file = tmp
            .reopen()
            .map_err(|e| ApiError::internal("Failed to store upload", e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            policy.check_size(size)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::internal("Failed to store upload", e))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::internal("Failed to store upload", e))?;

        received = Some((tmp, filename, size));
        break;
    }

    let (tmp, filename, size) =
        received.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file received"))?;

    info!("Received {} ({} bytes) from {}", filename, size, user.0);

    let upload = PendingUpload {
        path: tmp.path().to_path_buf(),
        filename,
        size_bytes: size,
        uploaded_by: Some(user.0),
    };
    let ingest_state = state.clone();
    let build = run_blocking(move || {
        let result = ingest_state.ingestion.ingest(&upload);
        // Temporary upload is removed once ingestion is done with it
        drop(tmp);
        result
    })
    .await?;

    Ok(Json(UploadResponse {
        success: true,
        message: "Build uploaded successfully".to_string(),
        build,
    }))
}

/// Deploy a build
pub async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<String>,
) -> Result<Json<DeployResponse>, ApiError> {
    info!("Deploying build: {}", build_id);

    let registry = state.registry.clone();
    let activation = run_blocking(move || registry.activate(&build_id)).await?;

    Ok(Json(DeployResponse {
        success: true,
        message: "Build deployed successfully".to_string(),
        build_id: activation.id,
        deployed_at: activation.activated_at,
    }))
}

/// Delete a build
pub async fn delete_build_handler(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    info!("Deleting build: {}", build_id);

    let registry = state.registry.clone();
    let id = build_id.clone();
    run_blocking(move || registry.delete(&id)).await?;

    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Build {} deleted", build_id),
    }))
}

/// Descriptor text of a build
pub async fn build_info_handler(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<String>,
) -> Result<Response, ApiError> {
    let registry = state.registry.clone();
    let id = build_id.clone();
    let text = run_blocking(move || registry.get_info(&id))
        .await
        .inspect_err(|e| warn!("No build info for {}: {}", build_id, e.message))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

/// Currently deployed build, if any
pub async fn active_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let registry = state.registry.clone();
    let active = run_blocking(move || Ok(registry.active())).await?;

    let response = match active {
        Some(active) => ActiveResponse {
            active: true,
            build: Some(active.build),
            deployed_at: active.deployed_at,
        },
        None => ActiveResponse {
            active: false,
            build: None,
            deployed_at: None,
        },
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        use build_registry::Error;

        let cases = [
            (Error::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (Error::Conflict("busy".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::Extract {
                    archive: "a.zip".into(),
                    reason: "bad".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_storage_paths_not_exposed() {
        use build_registry::Error;

        let storage = ApiError::from(Error::storage(
            "Failed to write /srv/deploy/builds/metadata.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        ));
        assert_eq!(storage.message, "Storage operation failed");
        assert_eq!(storage.details.as_deref(), Some("denied"));

        let extract = ApiError::from(Error::Extract {
            archive: "/srv/deploy/builds/build_1/app.zip".into(),
            reason: "invalid Zip archive".into(),
        });
        assert!(!extract.message.contains("/srv"));
        assert_eq!(extract.details.as_deref(), Some("invalid Zip archive"));
    }

    #[test]
    fn test_degraded_flag_carried() {
        let err = ApiError::from(build_registry::Error::ActivationDegraded {
            id: "build_1".into(),
            reason: "invalid Zip archive".into(),
        });

        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.degraded);
        assert_eq!(err.details.as_deref(), Some("invalid Zip archive"));
    }
}
