//! Storage module for persisting video recordings
//!
//! Recordings are plain files on a storage device. The recorder, playback
//! engine and catalog only ever talk to the [`Storage`] trait:
//! - Local filesystem storage (SD card or any mounted directory)
//! - In-memory storage for tests

pub mod local;
pub mod memory;

use anyhow::Result;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

/// An open file handle on a storage backend
pub trait StorageFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> StorageFile for T {}

/// One entry returned by [`Storage::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// True for directories
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub len: u64,
}

/// Storage backend trait
///
/// All operations are blocking. Async callers run them under
/// `tokio::task::block_in_place`.
pub trait Storage: Send + Sync {
    /// Root directory that holds all recordings
    fn root(&self) -> &Path;

    /// True if anything exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// True if `path` is an existing regular file
    fn is_file(&self, path: &Path) -> bool;

    /// Create or truncate a file for writing (readable and seekable too)
    fn create(&self, path: &Path) -> Result<Box<dyn StorageFile>>;

    /// Open an existing file for reading
    fn open(&self, path: &Path) -> Result<Box<dyn StorageFile>>;

    /// Rename a file; fails if the target already exists
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file
    fn remove(&self, path: &Path) -> Result<()>;

    /// Create a directory and any missing parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the direct children of a directory
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Get available capacity in bytes (None if unknown)
    fn available_bytes(&self) -> Result<Option<u64>>;
}

pub use local::LocalStorage;
pub use memory::MemoryStorage;
