//! Upload validation and ingestion

use crate::error::{Error, IoResultExt, Result};
use crate::models::BuildRecord;
use crate::registry::BuildRegistry;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Largest accepted upload: 100 MiB
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const ZIP_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

/// Boundary checks applied to an upload before anything touches the
/// builds root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Only `.zip` archives are accepted
    pub fn check_filename(&self, filename: &str) -> Result<()> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("No file received".to_string()));
        }

        let is_zip = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));

        if !is_zip {
            return Err(Error::Validation("Only ZIP files are allowed".to_string()));
        }

        Ok(())
    }

    /// The cap is inclusive
    pub fn check_size(&self, size_bytes: u64) -> Result<()> {
        if size_bytes > self.max_bytes {
            return Err(Error::Validation(format!(
                "File exceeds the maximum upload size of {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// The content must start with a ZIP signature
    pub fn check_signature(&self, head: &[u8]) -> Result<()> {
        if ZIP_SIGNATURES.iter().any(|sig| head.starts_with(&sig[..])) {
            Ok(())
        } else {
            Err(Error::Validation(
                "Uploaded file is not a ZIP archive".to_string(),
            ))
        }
    }
}

/// An uploaded archive waiting to be ingested
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Where the received bytes were written, outside the builds root
    pub path: PathBuf,

    /// Name supplied by the client
    pub filename: String,

    pub size_bytes: u64,

    pub uploaded_by: Option<String>,
}

/// Validates uploads and commits them to the registry
pub struct IngestionPipeline {
    registry: Arc<BuildRegistry>,
    policy: UploadPolicy,
}

impl IngestionPipeline {
    pub fn new(registry: Arc<BuildRegistry>, policy: UploadPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> UploadPolicy {
        self.policy
    }

    pub fn ingest(&self, upload: &PendingUpload) -> Result<BuildRecord> {
        self.policy.check_filename(&upload.filename)?;
        self.policy.check_size(upload.size_bytes)?;

        let mut head = Vec::with_capacity(4);
        File::open(&upload.path)
            .and_then(|file| file.take(4).read_to_end(&mut head))
            .storage_context(|| format!("Failed to read upload {}", upload.path.display()))?;
        self.policy.check_signature(&head)?;

        info!(
            "Ingesting {} ({} bytes)",
            upload.filename, upload.size_bytes
        );

        self.registry.create(
            &upload.path,
            &upload.filename,
            upload.size_bytes,
            upload.uploaded_by.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::ActivationStrategy;
    use crate::reload::NoopReloadHook;
    use crate::registry::StorageLayout;
    use crate::unpacker::test_support::write_zip;
    use std::fs;
    use tempfile::TempDir;

    fn pipeline(max_bytes: u64) -> (TempDir, IngestionPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::under(dir.path());
        layout.ensure().unwrap();
        let registry = Arc::new(BuildRegistry::open(
            layout,
            ActivationStrategy::Clear,
            Box::new(NoopReloadHook),
        ));
        (dir, IngestionPipeline::new(registry, UploadPolicy::new(max_bytes)))
    }

    fn upload_of(path: &Path, filename: &str) -> PendingUpload {
        PendingUpload {
            path: path.to_path_buf(),
            filename: filename.to_string(),
            size_bytes: fs::metadata(path).unwrap().len(),
            uploaded_by: Some("admin".to_string()),
        }
    }

    fn builds_root_entries(dir: &TempDir) -> usize {
        fs::read_dir(dir.path().join("builds")).unwrap().count()
    }

    #[test]
    fn test_check_filename() {
        let policy = UploadPolicy::default();

        assert!(policy.check_filename("release-1.0.zip").is_ok());
        assert!(policy.check_filename("RELEASE.ZIP").is_ok());
        assert!(policy.check_filename("release.tar.gz").is_err());
        assert!(policy.check_filename("zip").is_err());
        assert!(policy.check_filename("").is_err());
    }

    #[test]
    fn test_check_signature() {
        let policy = UploadPolicy::default();

        assert!(policy.check_signature(b"PK\x03\x04rest").is_ok());
        assert!(policy.check_signature(b"PK\x05\x06").is_ok());
        assert!(policy.check_signature(b"<html>").is_err());
        assert!(policy.check_signature(b"PK").is_err());
    }

    #[test]
    fn test_ingest_records_uploader() {
        let (dir, pipeline) = pipeline(MAX_UPLOAD_BYTES);
        let src = dir.path().join("uploads").join("incoming");
        write_zip(&src, &[("index.html", "v1")]);

        let record = pipeline.ingest(&upload_of(&src, "v1.zip")).unwrap();

        assert_eq!(record.original_filename, "v1.zip");
        assert_eq!(record.uploaded_by, "admin");
        assert_eq!(record.size_bytes, fs::metadata(&src).unwrap().len());
    }

    #[test]
    fn test_non_archive_rejected_before_write() {
        let (dir, pipeline) = pipeline(MAX_UPLOAD_BYTES);
        let src = dir.path().join("uploads").join("incoming");
        fs::write(&src, b"<html>not a zip</html>").unwrap();

        let wrong_extension = pipeline.ingest(&upload_of(&src, "site.html")).unwrap_err();
        let wrong_content = pipeline.ingest(&upload_of(&src, "site.zip")).unwrap_err();

        assert!(matches!(wrong_extension, Error::Validation(_)));
        assert!(matches!(wrong_content, Error::Validation(_)));
        assert_eq!(builds_root_entries(&dir), 0);
    }

    #[test]
    fn test_size_cap_is_inclusive() {
        let (dir, _) = pipeline(MAX_UPLOAD_BYTES);
        let src = dir.path().join("uploads").join("incoming");
        write_zip(&src, &[("index.html", "exact")]);
        let size = fs::metadata(&src).unwrap().len();

        let (_exact_dir, exact) = pipeline(size);
        assert!(exact.ingest(&upload_of(&src, "exact.zip")).is_ok());

        let (over_dir, over) = pipeline(size - 1);
        let err = over.ingest(&upload_of(&src, "over.zip")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(builds_root_entries(&over_dir), 0);
    }
}
