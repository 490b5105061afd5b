//! Local filesystem storage backend
//!
//! Recordings live under a root directory, one subdirectory per day.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{DirEntry, Storage, StorageFile};

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend, creating the root if needed
    pub fn new(root_path: impl Into<PathBuf>) -> Result<Self> {
        let root_path = root_path.into();
        fs::create_dir_all(&root_path)
            .with_context(|| format!("Failed to create storage directory: {:?}", root_path))?;
        info!("Recording storage at {:?}", root_path);
        Ok(Self { root_path })
    }
}

impl Storage for LocalStorage {
    fn root(&self) -> &Path {
        &self.root_path
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create(&self, path: &Path) -> Result<Box<dyn StorageFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        Ok(Box::new(file))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn StorageFile>> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if to.exists() {
            bail!("Failed to rename {:?}: {:?} already exists", from, to);
        }
        fs::rename(from, to).with_context(|| format!("Failed to rename {:?} to {:?}", from, to))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("Failed to remove {:?}", path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Failed to create directory {:?}", path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("Failed to list {:?}", path))? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            entries.push(DirEntry {
                path: entry.path(),
                is_dir: metadata.is_dir(),
                len: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        Ok(entries)
    }

    fn available_bytes(&self) -> Result<Option<u64>> {
        #[cfg(unix)]
        {
            use std::ffi::CString;
            let c_path = CString::new(self.root_path.to_str().unwrap_or("/"))
                .map_err(|e| anyhow::anyhow!("Invalid path: {}", e))?;
            unsafe {
                let mut stat: libc::statvfs = std::mem::zeroed();
                if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                    anyhow::bail!("statvfs failed: {}", std::io::Error::last_os_error());
                }
                #[allow(clippy::unnecessary_cast)]
                let available = stat.f_bavail as u64 * stat.f_frsize as u64;
                Ok(Some(available))
            }
        }
        #[cfg(not(unix))]
        {
            Ok(None)
        }
    }
}
