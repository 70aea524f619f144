//! Archive extraction

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::debug;

/// Unpacks an archive into a directory
pub trait Unpacker: Send + Sync {
    /// Extract `archive` into `dest`, creating `dest` if needed.
    ///
    /// Fails with [`Error::Extract`] on an unreadable or malformed archive.
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// ZIP extraction backed by the `zip` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipUnpacker;

impl Unpacker for ZipUnpacker {
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<()> {
        let file = File::open(archive).map_err(|e| Error::extract(archive, e))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| Error::extract(archive, e))?;

        fs::create_dir_all(dest).map_err(|e| Error::extract(archive, e))?;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| Error::extract(archive, format!("entry {}: {}", i, e)))?;

            // Entries that would land outside `dest` are skipped
            let outpath = match entry.enclosed_name() {
                Some(path) => dest.join(path),
                None => {
                    debug!("Skipping unsafe entry {}", entry.name());
                    continue;
                }
            };

            if entry.is_dir() {
                fs::create_dir_all(&outpath).map_err(|e| Error::extract(archive, e))?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::extract(archive, e))?;
            }

            let mut outfile = File::create(&outpath).map_err(|e| Error::extract(archive, e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| {
                Error::extract(archive, format!("{}: {}", entry.name(), e))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&outpath, fs::Permissions::from_mode(mode)).ok();
                }
            }
        }

        debug!("Unpacked {} entries from {}", zip.len(), archive.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;

    /// Write a ZIP containing `files` (name, contents) to `path`
    pub fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let entries: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(name, contents)| (*name, contents.as_bytes()))
            .collect();
        write_zip_bytes(path, &entries);
    }

    pub fn write_zip_bytes(path: &Path, files: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        for (name, contents) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }

        zip.finish().unwrap();
    }
}
