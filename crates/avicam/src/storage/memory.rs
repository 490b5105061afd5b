//! In-memory storage backend
//!
//! Behaves like a small filesystem held in a map. Used by tests and by
//! anything that wants to exercise the recorder without a real disk.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DirEntry, Storage, StorageFile};

type FileData = Arc<Mutex<Vec<u8>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct Tree {
    files: BTreeMap<PathBuf, FileData>,
    dirs: BTreeSet<PathBuf>,
}

/// In-memory storage backend
pub struct MemoryStorage {
    root_path: PathBuf,
    tree: Mutex<Tree>,
    available: Mutex<Option<u64>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store rooted at `root_path`
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let mut tree = Tree::default();
        tree.dirs.insert(root_path.clone());
        Self {
            root_path,
            tree: Mutex::new(tree),
            available: Mutex::new(None),
        }
    }

    /// Set the capacity reported by `available_bytes`
    pub fn set_available_bytes(&self, available: Option<u64>) {
        *lock(&self.available) = available;
    }

    /// Copy of a file's current contents
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        let tree = lock(&self.tree);
        tree.files.get(path).map(|data| lock(data).clone())
    }

    /// Write a whole file in one call, creating parent directories
    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let path = path.into();
        let mut tree = lock(&self.tree);
        if let Some(parent) = path.parent() {
            add_dirs(&mut tree, parent);
        }
        tree.files.insert(path, Arc::new(Mutex::new(data)));
    }
}

fn add_dirs(tree: &mut Tree, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        tree.dirs.insert(ancestor.to_path_buf());
    }
}

impl Storage for MemoryStorage {
    fn root(&self) -> &Path {
        &self.root_path
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = lock(&self.tree);
        tree.files.contains_key(path) || tree.dirs.contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        lock(&self.tree).files.contains_key(path)
    }

    fn create(&self, path: &Path) -> Result<Box<dyn StorageFile>> {
        let mut tree = lock(&self.tree);
        match path.parent() {
            Some(parent) if tree.dirs.contains(parent) => {}
            _ => bail!("Failed to create {:?}: parent directory missing", path),
        }
        if tree.dirs.contains(path) {
            bail!("Failed to create {:?}: is a directory", path);
        }
        let data: FileData = Arc::new(Mutex::new(Vec::new()));
        tree.files.insert(path.to_path_buf(), data.clone());
        Ok(Box::new(MemoryFile { data, pos: 0 }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn StorageFile>> {
        let tree = lock(&self.tree);
        match tree.files.get(path) {
            Some(data) => Ok(Box::new(MemoryFile {
                data: data.clone(),
                pos: 0,
            })),
            None => bail!("Failed to open {:?}: not found", path),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut tree = lock(&self.tree);
        match to.parent() {
            Some(parent) if tree.dirs.contains(parent) => {}
            _ => bail!("Failed to rename to {:?}: parent directory missing", to),
        }
        if tree.files.contains_key(to) {
            bail!("Failed to rename {:?}: {:?} already exists", from, to);
        }
        match tree.files.remove(from) {
            Some(data) => {
                tree.files.insert(to.to_path_buf(), data);
                Ok(())
            }
            None => bail!("Failed to rename {:?}: not found", from),
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        match lock(&self.tree).files.remove(path) {
            Some(_) => Ok(()),
            None => bail!("Failed to remove {:?}: not found", path),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut tree = lock(&self.tree);
        if tree.files.contains_key(path) {
            bail!("Failed to create directory {:?}: is a file", path);
        }
        add_dirs(&mut tree, path);
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let tree = lock(&self.tree);
        if !tree.dirs.contains(path) {
            bail!("Failed to list {:?}: not a directory", path);
        }
        let dirs = tree
            .dirs
            .iter()
            .filter(|d| d.parent() == Some(path))
            .map(|d| DirEntry {
                path: d.clone(),
                is_dir: true,
                len: 0,
            });
        let files = tree
            .files
            .iter()
            .filter(|(f, _)| f.parent() == Some(path))
            .map(|(f, data)| DirEntry {
                path: f.clone(),
                is_dir: false,
                len: lock(data).len() as u64,
            });
        Ok(dirs.chain(files).collect())
    }

    fn available_bytes(&self) -> Result<Option<u64>> {
        Ok(*lock(&self.available))
    }
}

/// Handle onto one in-memory file; shares the data with the store
struct MemoryFile {
    data: FileData,
    pos: u64,
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = lock(&self.data);
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = lock(&self.data);
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = lock(&self.data).len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
