//! Build registry: create, list, activate and delete builds

use crate::deployer::{ActivationStrategy, Deployer};
use crate::error::{Error, IoResultExt, Result};
use crate::models::{
    is_valid_build_id, new_build_id, BuildRecord, Registry, BUILD_INFO_UNAVAILABLE,
    DESCRIPTOR_FILENAME,
};
use crate::reload::ReloadHook;
use crate::store::{JsonFileStore, MetadataStore};
use crate::unpacker::{Unpacker, ZipUnpacker};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// On-disk locations used by the registry
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// One directory per build, plus the metadata document
    pub builds_root: PathBuf,

    /// In-flight uploads and scratch extraction
    pub uploads_dir: PathBuf,

    /// Unpacked contents of the active build
    pub active_dir: PathBuf,
}

impl StorageLayout {
    /// Conventional layout under a single data directory
    pub fn under(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            builds_root: data_dir.join("builds"),
            uploads_dir: data_dir.join("uploads"),
            active_dir: data_dir.join("active-build"),
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.builds_root.join("metadata.json")
    }

    pub fn build_dir(&self, id: &str) -> PathBuf {
        self.builds_root.join(id)
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.builds_root, &self.uploads_dir, &self.active_dir] {
            fs::create_dir_all(dir)
                .storage_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Result of a successful activation
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub id: String,
    pub activated_at: DateTime<Utc>,
}

/// The active build and when it was deployed
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBuild {
    pub build: BuildRecord,
    pub deployed_at: Option<DateTime<Utc>>,
}

/// Registry of uploaded builds and owner of the active deployment
///
/// Structural mutations (committing a new build, activating, deleting) are
/// serialized through a single lock so their load→mutate→save sequences and
/// active-directory work never interleave. Reads go straight to the store.
pub struct BuildRegistry {
    layout: StorageLayout,
    store: Box<dyn MetadataStore>,
    unpacker: Arc<dyn Unpacker>,
    deployer: Deployer,
    mutation_lock: Mutex<()>,
}

impl BuildRegistry {
    pub fn new(
        layout: StorageLayout,
        store: Box<dyn MetadataStore>,
        unpacker: Arc<dyn Unpacker>,
        deployer: Deployer,
    ) -> Self {
        Self {
            layout,
            store,
            unpacker,
            deployer,
            mutation_lock: Mutex::new(()),
        }
    }

    /// Registry over a JSON metadata file and ZIP extraction
    pub fn open(
        layout: StorageLayout,
        strategy: ActivationStrategy,
        reload_hook: Box<dyn ReloadHook>,
    ) -> Self {
        let unpacker: Arc<dyn Unpacker> = Arc::new(ZipUnpacker);
        let store = JsonFileStore::new(layout.metadata_path());
        let deployer = Deployer::new(
            layout.active_dir.clone(),
            strategy,
            unpacker.clone(),
            reload_hook,
        );

        Self::new(layout, Box::new(store), unpacker, deployer)
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Current registry, read from the store
    pub fn list(&self) -> Registry {
        self.store.load()
    }

    /// Record of a registered build
    pub fn get(&self, id: &str) -> Result<BuildRecord> {
        self.store
            .load()
            .find(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn active(&self) -> Option<ActiveBuild> {
        let registry = self.store.load();
        let deployed_at = registry.last_deployment_at;

        registry.active_build().cloned().map(|build| ActiveBuild {
            build,
            deployed_at,
        })
    }

    /// Register a new build from an archive on disk
    ///
    /// The archive is copied into the build's own directory before the
    /// record is committed, so a record never exists without its files.
    pub fn create(
        &self,
        archive_path: &Path,
        original_filename: &str,
        uploaded_bytes: u64,
        uploaded_by: Option<&str>,
    ) -> Result<BuildRecord> {
        let filename = Path::new(original_filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Validation(format!("Invalid filename: {}", original_filename)))?
            .to_string();

        let id = new_build_id();
        let build_dir = self.layout.build_dir(&id);

        fs::create_dir_all(&build_dir)
            .storage_context(|| format!("Failed to create build directory {}", build_dir.display()))?;

        let record = match self.persist_build_files(&build_dir, archive_path, &filename) {
            Ok(build_info) => BuildRecord::new(id, filename, uploaded_bytes, build_info, uploaded_by),
            Err(e) => {
                fs::remove_dir_all(&build_dir).ok();
                return Err(e);
            }
        };

        let _guard = self.lock();
        let mut registry = self.store.load();
        registry.builds.insert(0, record.clone());

        if let Err(e) = self.store.save(&registry) {
            fs::remove_dir_all(&build_dir).ok();
            return Err(e);
        }

        info!(
            "Registered build {} ({}, {}) uploaded by {}",
            record.id, record.original_filename, record.display_size, record.uploaded_by
        );
        Ok(record)
    }

    /// Make `id` the active build
    pub fn activate(&self, id: &str) -> Result<Activation> {
        let _guard = self.lock();
        let mut registry = self.store.load();

        let record = registry
            .find(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let archive = self
            .layout
            .build_dir(&record.id)
            .join(&record.original_filename);

        info!(
            "Deploying build {} ({} strategy)",
            record.id,
            self.deployer.strategy()
        );
        self.deployer.install(&record.id, &archive)?;

        let previous = registry.active_id.clone();
        let activated_at = Utc::now();
        registry.mark_active(&record.id, activated_at);
        if let Err(e) = self.store.save(&registry) {
            error!(
                "Active build directory holds {} but metadata still names {}: {}",
                record.id,
                previous.as_deref().unwrap_or("no build"),
                e
            );
            return Err(e);
        }

        info!("Build {} is now active", record.id);
        self.deployer.notify_reload();

        Ok(Activation {
            id: record.id,
            activated_at,
        })
    }

    /// Remove a build and its files
    ///
    /// The active build can only be removed while it is the sole build.
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock();
        let mut registry = self.store.load();

        let index = registry
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let was_active = registry.is_active(id);

        if was_active && registry.builds.len() > 1 {
            return Err(Error::Conflict(
                "Cannot delete the currently deployed build. Deploy another build first."
                    .to_string(),
            ));
        }

        if was_active {
            self.deployer.clear()?;
        }

        let build_dir = self.layout.build_dir(id);
        match fs::remove_dir_all(&build_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Build directory {} already missing", build_dir.display());
            }
            Err(e) => {
                return Err(Error::storage(
                    format!("Failed to remove {}", build_dir.display()),
                    e,
                ))
            }
        }

        registry.builds.remove(index);
        if was_active {
            registry.clear_active();
        }
        self.store.save(&registry)?;

        info!("Deleted build {}", id);
        Ok(())
    }

    /// Descriptor text persisted for a build
    pub fn get_info(&self, id: &str) -> Result<String> {
        if !is_valid_build_id(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        let record = self.get(id)?;

        let path = self.layout.build_dir(&record.id).join(DESCRIPTOR_FILENAME);
        match fs::read(&path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{} for {}", DESCRIPTOR_FILENAME, id)))
            }
            Err(e) => Err(Error::storage(
                format!("Failed to read {}", path.display()),
                e,
            )),
        }
    }

    /// Copy the archive into `build_dir` and persist its descriptor text
    fn persist_build_files(
        &self,
        build_dir: &Path,
        archive_path: &Path,
        filename: &str,
    ) -> Result<String> {
        let stored = build_dir.join(filename);
        fs::copy(archive_path, &stored)
            .storage_context(|| format!("Failed to store archive {}", stored.display()))?;

        let build_info = self.read_descriptor(&stored);

        let descriptor = build_dir.join(DESCRIPTOR_FILENAME);
        fs::write(&descriptor, &build_info)
            .storage_context(|| format!("Failed to write {}", descriptor.display()))?;

        Ok(build_info)
    }

    /// Unpack into a scratch directory and read the descriptor, if any
    fn read_descriptor(&self, archive: &Path) -> String {
        let scratch = match tempfile::Builder::new()
            .prefix("descriptor-")
            .tempdir_in(&self.layout.uploads_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Failed to create scratch directory: {}", e);
                return BUILD_INFO_UNAVAILABLE.to_string();
            }
        };

        if let Err(e) = self.unpacker.unpack(archive, scratch.path()) {
            warn!(
                "Could not read {} from {}: {}",
                DESCRIPTOR_FILENAME,
                archive.display(),
                e.details().unwrap_or_else(|| e.to_string())
            );
            return BUILD_INFO_UNAVAILABLE.to_string();
        }

        match fs::read(scratch.path().join(DESCRIPTOR_FILENAME)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                debug!("{} has no {}", archive.display(), DESCRIPTOR_FILENAME);
                BUILD_INFO_UNAVAILABLE.to_string()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
