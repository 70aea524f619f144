//! Active build directory management
//!
//! The [`Deployer`] owns the single directory that holds the unpacked
//! contents of the active build. Two strategies are supported:
//!
//! - [`ActivationStrategy::Clear`] empties the directory in place and unpacks
//!   into it. If extraction fails the directory stays empty and the failure
//!   is reported as [`Error::ActivationDegraded`].
//! - [`ActivationStrategy::Staged`] unpacks into a sibling staging directory
//!   and swaps it in by rename only after extraction succeeded, so a failed
//!   extraction leaves the previous deployment in place.

use crate::error::{Error, IoResultExt, Result};
use crate::reload::ReloadHook;
use crate::unpacker::Unpacker;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How a build is swapped into the active directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationStrategy {
    /// Clear the directory in place, then extract
    #[default]
    Clear,
    /// Extract into a staging directory, then rename it into place
    Staged,
}

impl FromStr for ActivationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" => Ok(ActivationStrategy::Clear),
            "staged" => Ok(ActivationStrategy::Staged),
            other => Err(format!(
                "Unknown activation mode '{}' (expected clear or staged)",
                other
            )),
        }
    }
}

impl fmt::Display for ActivationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationStrategy::Clear => write!(f, "clear"),
            ActivationStrategy::Staged => write!(f, "staged"),
        }
    }
}

pub struct Deployer {
    active_dir: PathBuf,
    strategy: ActivationStrategy,
    unpacker: Arc<dyn Unpacker>,
    reload_hook: Box<dyn ReloadHook>,
}

impl Deployer {
    pub fn new(
        active_dir: impl Into<PathBuf>,
        strategy: ActivationStrategy,
        unpacker: Arc<dyn Unpacker>,
        reload_hook: Box<dyn ReloadHook>,
    ) -> Self {
        Self {
            active_dir: active_dir.into(),
            strategy,
            unpacker,
            reload_hook,
        }
    }

    pub fn active_dir(&self) -> &Path {
        &self.active_dir
    }

    pub fn strategy(&self) -> ActivationStrategy {
        self.strategy
    }

    /// Replace the active directory contents with the unpacked `archive`
    pub fn install(&self, id: &str, archive: &Path) -> Result<()> {
        match self.strategy {
            ActivationStrategy::Clear => self.install_in_place(id, archive),
            ActivationStrategy::Staged => self.install_staged(archive),
        }
    }

    /// Remove everything inside the active directory, keeping the directory
    /// itself. A missing directory is recreated.
    pub fn clear(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.active_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return fs::create_dir_all(&self.active_dir).storage_context(|| {
                    format!("Failed to create {}", self.active_dir.display())
                });
            }
            Err(e) => {
                return Err(Error::storage(
                    format!("Failed to read {}", self.active_dir.display()),
                    e,
                ))
            }
        };

        for entry in entries {
            let entry = entry
                .storage_context(|| format!("Failed to read {}", self.active_dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .storage_context(|| format!("Failed to stat {}", path.display()))?;

            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.storage_context(|| format!("Failed to remove {}", path.display()))?;
        }

        Ok(())
    }

    /// Best-effort reload notification
    pub fn notify_reload(&self) {
        match self.reload_hook.reload() {
            Ok(()) => info!("Reload hook completed"),
            Err(e) => warn!("Reload hook failed: {:#}", e),
        }
    }

    fn install_in_place(&self, id: &str, archive: &Path) -> Result<()> {
        self.clear()?;

        if let Err(e) = self.unpacker.unpack(archive, &self.active_dir) {
            let reason = e.details().unwrap_or_else(|| e.to_string());
            // Leave the directory empty rather than half-extracted
            if let Err(clear_err) = self.clear() {
                warn!("Failed to clear partial extraction: {}", clear_err);
            }
            return Err(Error::ActivationDegraded {
                id: id.to_string(),
                reason,
            });
        }

        Ok(())
    }

    fn install_staged(&self, archive: &Path) -> Result<()> {
        let staging = self.sibling("staging");
        if let Err(e) = self.unpacker.unpack(archive, &staging) {
            fs::remove_dir_all(&staging).ok();
            return Err(e);
        }

        if !self.active_dir.exists() {
            return fs::rename(&staging, &self.active_dir).storage_context(|| {
                format!("Failed to move staging into {}", self.active_dir.display())
            });
        }

        let retired = self.sibling("old");
        fs::rename(&self.active_dir, &retired).storage_context(|| {
            format!("Failed to move {} aside", self.active_dir.display())
        })?;

        if let Err(e) = fs::rename(&staging, &self.active_dir) {
            // Put the previous deployment back
            if let Err(restore_err) = fs::rename(&retired, &self.active_dir) {
                warn!("Failed to restore previous deployment: {}", restore_err);
            }
            fs::remove_dir_all(&staging).ok();
            return Err(Error::storage(
                format!("Failed to move staging into {}", self.active_dir.display()),
                e,
            ));
        }

        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!("Failed to remove retired deployment {}: {}", retired.display(), e);
        }

        Ok(())
    }

    /// A unique path next to the active directory
    fn sibling(&self, label: &str) -> PathBuf {
        let name = self
            .active_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "active-build".to_string());
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!(".{}.{}-{}", name, label, &suffix[..8]);

        match self.active_dir.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::NoopReloadHook;
    use crate::unpacker::test_support::write_zip;
    use crate::unpacker::ZipUnpacker;

    fn deployer(root: &Path, strategy: ActivationStrategy) -> Deployer {
        Deployer::new(
            root.join("active-build"),
            strategy,
            Arc::new(ZipUnpacker),
            Box::new(NoopReloadHook),
        )
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(
            "clear".parse::<ActivationStrategy>().unwrap(),
            ActivationStrategy::Clear
        );
        assert_eq!(
            "Staged".parse::<ActivationStrategy>().unwrap(),
            ActivationStrategy::Staged
        );
        assert!("swap".parse::<ActivationStrategy>().is_err());
    }

    #[test]
    fn test_clear_keeps_directory() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Clear);
        fs::create_dir_all(deployer.active_dir().join("nested/deep")).unwrap();
        fs::write(deployer.active_dir().join("index.html"), "x").unwrap();

        deployer.clear().unwrap();

        assert!(deployer.active_dir().is_dir());
        assert!(listing(deployer.active_dir()).is_empty());
    }

    #[test]
    fn test_clear_recreates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Clear);

        deployer.clear().unwrap();

        assert!(deployer.active_dir().is_dir());
    }

    #[test]
    fn test_clear_install_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Clear);
        let v1 = dir.path().join("v1.zip");
        let v2 = dir.path().join("v2.zip");
        write_zip(&v1, &[("old.html", "v1")]);
        write_zip(&v2, &[("index.html", "v2")]);

        deployer.install("b1", &v1).unwrap();
        deployer.install("b2", &v2).unwrap();

        assert_eq!(listing(deployer.active_dir()), vec!["index.html"]);
    }

    #[test]
    fn test_clear_install_failure_is_degraded_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Clear);
        let good = dir.path().join("good.zip");
        let bad = dir.path().join("bad.zip");
        write_zip(&good, &[("index.html", "good")]);
        fs::write(&bad, b"PK\x03\x04garbage").unwrap();

        deployer.install("good", &good).unwrap();
        let err = deployer.install("bad", &bad).unwrap_err();

        assert!(err.is_degraded());
        assert!(listing(deployer.active_dir()).is_empty());
    }

    #[test]
    fn test_staged_install_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Staged);
        let good = dir.path().join("good.zip");
        let bad = dir.path().join("bad.zip");
        write_zip(&good, &[("index.html", "good")]);
        fs::write(&bad, b"PK\x03\x04garbage").unwrap();

        deployer.install("good", &good).unwrap();
        let err = deployer.install("bad", &bad).unwrap_err();

        assert!(matches!(err, Error::Extract { .. }));
        assert_eq!(
            fs::read_to_string(deployer.active_dir().join("index.html")).unwrap(),
            "good"
        );
        // No staging or retired directories left behind
        assert_eq!(
            listing(dir.path()),
            vec!["active-build", "bad.zip", "good.zip"]
        );
    }

    #[test]
    fn test_staged_install_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let deployer = deployer(dir.path(), ActivationStrategy::Staged);
        let v1 = dir.path().join("v1.zip");
        let v2 = dir.path().join("v2.zip");
        write_zip(&v1, &[("old.html", "v1")]);
        write_zip(&v2, &[("index.html", "v2")]);

        deployer.install("b1", &v1).unwrap();
        deployer.install("b2", &v2).unwrap();

        assert_eq!(listing(deployer.active_dir()), vec!["index.html"]);
        assert_eq!(listing(dir.path()), vec!["active-build", "v1.zip", "v2.zip"]);
    }
}
