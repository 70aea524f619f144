use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input: wrong file type, oversized upload, missing field
    #[error("{0}")]
    Validation(String),

    #[error("Build not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{context}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract archive {archive}")]
    Extract { archive: String, reason: String },

    /// The active directory was cleared but the new build could not be
    /// unpacked into it. Registry metadata still names the previous build.
    #[error("Deployment of {id} failed after the active build directory was cleared; deploy a build again to recover")]
    ActivationDegraded { id: String, reason: String },
}

impl Error {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn extract(archive: &std::path::Path, reason: impl ToString) -> Self {
        Error::Extract {
            archive: archive.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Optional detail string shown to callers next to the message
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Storage { source, .. } => Some(source.to_string()),
            Error::Extract { reason, .. } | Error::ActivationDegraded { reason, .. } => {
                Some(reason.clone())
            }
            Error::Validation(_) | Error::NotFound(_) | Error::Conflict(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Error::ActivationDegraded { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach storage context to filesystem results
pub(crate) trait IoResultExt<T> {
    fn storage_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn storage_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::storage(f(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_details_come_from_source() {
        let err: Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .storage_context(|| "Failed to create build directory");

        let err = err.unwrap_err();
        assert_eq!(err.to_string(), "Failed to create build directory");
        assert_eq!(err.details().as_deref(), Some("denied"));
        assert!(!err.is_degraded());
    }

    #[test]
    fn test_degraded_is_distinguishable() {
        let err = Error::ActivationDegraded {
            id: "build_1".to_string(),
            reason: "invalid Zip archive".to_string(),
        };

        assert!(err.is_degraded());
        assert!(err.to_string().contains("build_1"));
        assert_eq!(err.details().as_deref(), Some("invalid Zip archive"));
    }
}
