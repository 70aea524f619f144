//! Durable storage for the build registry document

use crate::error::{Error, IoResultExt, Result};
use crate::models::Registry;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Storage backend for the registry document
///
/// `save` replaces the whole document. `load` never fails: a missing or
/// unreadable document is treated as an empty registry.
pub trait MetadataStore: Send + Sync {
    fn load(&self) -> Registry;

    fn save(&self, registry: &Registry) -> Result<()>;
}

/// Registry persisted as a pretty-printed JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetadataStore for JsonFileStore {
    fn load(&self) -> Registry {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No metadata at {}, starting empty", self.path.display());
                return Registry::default();
            }
            Err(e) => {
                warn!("Failed to read metadata {}: {}", self.path.display(), e);
                return Registry::default();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Corrupt metadata {}, starting empty: {}", self.path.display(), e);
                Registry::default()
            }
        }
    }

    fn save(&self, registry: &Registry) -> Result<()> {
        let json = serde_json::to_vec_pretty(registry).map_err(|e| {
            Error::storage("Failed to serialize metadata", std::io::Error::other(e))
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .storage_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        // Write next to the target and rename over it
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .storage_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .storage_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Saved metadata with {} builds", registry.builds.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildRecord;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("metadata.json"));

        assert_eq!(store.load(), Registry::default());
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        fs::write(&path, b"{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.load(), Registry::default());
    }

    #[test]
    fn test_save_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("metadata.json"));

        let mut registry = Registry::default();
        registry.builds.push(BuildRecord::new(
            "build_1".to_string(),
            "v1.zip".to_string(),
            42,
            "v1".to_string(),
            Some("admin"),
        ));
        registry.mark_active("build_1", chrono::Utc::now());
        store.save(&registry).unwrap();
        assert_eq!(store.load(), registry);

        store.save(&Registry::default()).unwrap();
        assert_eq!(store.load(), Registry::default());
        assert!(!dir.path().join("metadata.json.tmp").exists());
    }
}
