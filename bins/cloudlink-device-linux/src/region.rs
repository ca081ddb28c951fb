//! The credential block as a file.
//!
//! Reads and writes go to an in-memory copy. `commit` writes the whole block
//! to a sibling temp file and renames it over the target, so a crash leaves
//! either the old or the new block on disk.

use std::fs;
use std::path::{Path, PathBuf};

use cloudlink_core::credentials::REGION_SIZE;
use cloudlink_core::region::check_bounds;
use cloudlink_core::{ByteRegion, StorageError};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    cache: Vec<u8>,
}

impl FileRegion {
    /// Open the block at `path`. A missing file reads as all zeros; a short
    /// file is zero-padded and a long one truncated.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let mut cache = vec![0u8; REGION_SIZE];

        match fs::read(&path) {
            Ok(bytes) => {
                if bytes.len() != REGION_SIZE {
                    warn!(
                        "{} holds {} bytes, expected {}",
                        path.display(),
                        bytes.len(),
                        REGION_SIZE
                    );
                }
                let len = bytes.len().min(REGION_SIZE);
                cache[..len].copy_from_slice(&bytes[..len]);
                debug!("Loaded credential block from {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No credential block at {}, starting empty", path.display());
            }
            Err(e) => {
                return Err(StorageError::Read(format!("{}: {}", path.display(), e)));
            }
        }

        Ok(Self { path, cache })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ByteRegion for FileRegion {
    fn size(&self) -> usize {
        self.cache.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), self.cache.len())?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, data.len(), self.cache.len())?;
        self.cache[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let commit_err = |e: std::io::Error| StorageError::Commit(format!("{}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(commit_err)?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &self.cache).map_err(commit_err)?;
        fs::rename(&temp, &self.path).map_err(commit_err)?;
        debug!("Committed credential block to {}", self.path.display());
        Ok(())
    }
}
