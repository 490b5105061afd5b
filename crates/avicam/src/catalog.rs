//! Recording catalog: naming, ordering and housekeeping of AVI files
//!
//! Recordings are stored as `<root>/YYYY-MM-DD/YYYY-MM-DD_HH-MM-SS_<SIZE>_<FPS>_<DUR>s.avi`,
//! so sorting full paths gives chronological order. The file currently being
//! written lives at a fixed temporary path and is never part of the catalog.

use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{DirEntry, Storage};

/// Name of the file a recording is written to before it is kept
pub const TEMP_FILE_NAME: &str = "avi_temp.avi";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Metadata encoded in a kept recording's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingName {
    /// Local time the recording started
    pub started_at: NaiveDateTime,
    /// Frame size tag, e.g. `SVGA`
    pub size_tag: String,
    /// Measured frame rate
    pub fps: u32,
    /// Whole seconds recorded
    pub duration_secs: u64,
}

impl RecordingName {
    /// Day directory, `YYYY-MM-DD`
    pub fn dir_name(&self) -> String {
        self.started_at.format(DATE_FORMAT).to_string()
    }

    /// File name, `YYYY-MM-DD_HH-MM-SS_<SIZE>_<FPS>_<DUR>s.avi`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}s.avi",
            self.started_at.format(TIMESTAMP_FORMAT),
            self.size_tag,
            self.fps,
            self.duration_secs
        )
    }

    /// Path relative to the storage root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.dir_name()).join(self.file_name())
    }

    /// Parse a file name produced by [`RecordingName::file_name`]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.get(..file_name.len().checked_sub(4)?)?;
        if !file_name[stem.len()..].eq_ignore_ascii_case(".avi") {
            return None;
        }
        let mut parts = stem.splitn(5, '_');
        let date = parts.next()?;
        let time = parts.next()?;
        let size_tag = parts.next()?;
        let fps = parts.next()?.parse().ok()?;
        let duration_secs = parts.next()?.strip_suffix('s')?.parse().ok()?;
        let started_at =
            NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), TIMESTAMP_FORMAT).ok()?;
        if size_tag.is_empty() {
            return None;
        }
        Some(Self {
            started_at,
            size_tag: size_tag.to_string(),
            fps,
            duration_secs,
        })
    }
}

/// A kept recording, as reported by [`RecordingCatalog::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub started_at: NaiveDateTime,
    pub size_tag: String,
    pub fps: u32,
    pub duration_secs: u64,
    pub size_bytes: u64,
}

fn is_avi(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("avi"))
}

fn is_temp(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == TEMP_FILE_NAME)
}

/// View of all recordings under a storage root
#[derive(Clone)]
pub struct RecordingCatalog {
    storage: Arc<dyn Storage>,
}

impl RecordingCatalog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Path of the in-progress recording
    pub fn temp_path(&self) -> PathBuf {
        self.storage.root().join(TEMP_FILE_NAME)
    }

    /// Resolve a possibly relative path against the storage root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.storage.root().join(path)
        }
    }

    /// True if `path` stays inside the storage root.
    ///
    /// `..` components are refused outright: `starts_with` compares components
    /// without resolving them.
    fn within_root(&self, path: &Path) -> bool {
        path.starts_with(self.storage.root())
            && !path.components().any(|c| c == Component::ParentDir)
    }

    /// All recording files, sorted by path
    fn scan(&self) -> Result<Vec<DirEntry>> {
        let mut found = Vec::new();
        let mut pending = vec![self.storage.root().to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.storage.read_dir(&dir)? {
                if entry.is_dir {
                    pending.push(entry.path);
                } else if is_avi(&entry.path) && !is_temp(&entry.path) {
                    found.push(entry);
                }
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Catalog scan found {} recordings", found.len());
        Ok(found)
    }

    /// All recording paths in playback order
    pub fn paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.scan()?.into_iter().map(|e| e.path).collect())
    }

    /// Earliest recording
    pub fn first(&self) -> Result<Option<PathBuf>> {
        Ok(self.scan()?.into_iter().next().map(|e| e.path))
    }

    /// Smallest recording path strictly after `current`
    pub fn next_after(&self, current: &Path) -> Result<Option<PathBuf>> {
        let current = self.resolve(current);
        Ok(self
            .scan()?
            .into_iter()
            .map(|e| e.path)
            .find(|p| p.as_path() > current.as_path()))
    }

    /// True if `path` names an existing recording that playback may open
    pub fn is_playable(&self, path: &Path) -> bool {
        let path = self.resolve(path);
        self.within_root(&path)
            && is_avi(&path)
            && !is_temp(&path)
            && self.storage.is_file(&path)
    }

    /// Where playback starts: the requested file when it is playable,
    /// otherwise the earliest recording.
    pub fn resolve_start(&self, requested: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = requested {
            if self.is_playable(path) {
                return Ok(Some(self.resolve(path)));
            }
            info!("Requested playback file {:?} not available, starting from first", path);
        }
        self.first()
    }

    /// Kept recordings with metadata parsed from their names
    pub fn list(&self) -> Result<Vec<RecordingInfo>> {
        let mut recordings = Vec::new();
        for entry in self.scan()? {
            let name = entry
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(RecordingName::parse);
            match name {
                Some(name) => recordings.push(RecordingInfo {
                    path: entry.path,
                    started_at: name.started_at,
                    size_tag: name.size_tag,
                    fps: name.fps,
                    duration_secs: name.duration_secs,
                    size_bytes: entry.len,
                }),
                None => debug!("Skipping unrecognised file {:?}", entry.path),
            }
        }
        Ok(recordings)
    }

    /// Delete a kept recording
    pub fn delete(&self, path: &Path) -> Result<()> {
        let path = self.resolve(path);
        if !self.within_root(&path) {
            bail!("Refusing to delete {:?}: outside storage root", path);
        }
        if is_temp(&path) {
            bail!("Refusing to delete the recording in progress");
        }
        if !is_avi(&path) {
            bail!("Refusing to delete {:?}: not a recording", path);
        }
        self.storage.remove(&path)?;
        info!("Deleted recording {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::NaiveDate;

    fn catalog_with(files: &[&str]) -> (Arc<MemoryStorage>, RecordingCatalog) {
        let storage = Arc::new(MemoryStorage::new("/sd"));
        for f in files {
            storage.insert(Path::new("/sd").join(f), vec![0u8; 10]);
        }
        let catalog = RecordingCatalog::new(storage.clone());
        (storage, catalog)
    }

    // ========== Naming ==========

    #[test]
    fn recording_name_round_trip() {
        let name = RecordingName {
            started_at: NaiveDate::from_ymd_opt(2024, 3, 9)
                .unwrap()
                .and_hms_opt(7, 5, 2)
                .unwrap(),
            size_tag: "SVGA".to_string(),
            fps: 9,
            duration_secs: 30,
        };
        assert_eq!(name.dir_name(), "2024-03-09");
        assert_eq!(name.file_name(), "2024-03-09_07-05-02_SVGA_9_30s.avi");
        assert_eq!(
            name.relative_path(),
            PathBuf::from("2024-03-09/2024-03-09_07-05-02_SVGA_9_30s.avi")
        );
        assert_eq!(RecordingName::parse(&name.file_name()), Some(name));
    }

    #[test]
    fn recording_name_rejects_foreign_files() {
        assert!(RecordingName::parse("avi_temp.avi").is_none());
        assert!(RecordingName::parse("2024-03-09_07-05-02_SVGA_9_30s.mp4").is_none());
        assert!(RecordingName::parse("2024-03-09_07-05-02_SVGA_x_30s.avi").is_none());
        assert!(RecordingName::parse("2024-13-09_07-05-02_SVGA_9_30s.avi").is_none());
        assert!(RecordingName::parse(".avi").is_none());
        assert!(RecordingName::parse("").is_none());
    }

    // ========== Ordering ==========

    #[test]
    fn files_are_visited_chronologically() {
        let (_storage, catalog) = catalog_with(&[
            "2024-01-01/2024-01-01_10-00-00_SVGA_10_30s.avi",
            "2024-01-01/2024-01-01_09-00-00_SVGA_10_30s.avi",
            "2024-01-02/2024-01-02_08-00-00_SVGA_10_30s.avi",
        ]);

        let first = catalog.first().unwrap().unwrap();
        assert!(first.ends_with("2024-01-01_09-00-00_SVGA_10_30s.avi"));
        let second = catalog.next_after(&first).unwrap().unwrap();
        assert!(second.ends_with("2024-01-01_10-00-00_SVGA_10_30s.avi"));
        let third = catalog.next_after(&second).unwrap().unwrap();
        assert!(third.ends_with("2024-01-02_08-00-00_SVGA_10_30s.avi"));
        assert!(catalog.next_after(&third).unwrap().is_none());
    }

    #[test]
    fn temp_and_foreign_files_are_excluded() {
        let (_storage, catalog) = catalog_with(&[
            "avi_temp.avi",
            "notes.txt",
            "2024-01-01/2024-01-01_09-00-00_SVGA_10_30s.AVI",
        ]);
        let paths = catalog.paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("2024-01-01_09-00-00_SVGA_10_30s.AVI"));
    }

    #[test]
    fn empty_storage_has_no_first_file() {
        let (_storage, catalog) = catalog_with(&[]);
        assert!(catalog.first().unwrap().is_none());
        assert!(catalog.resolve_start(None).unwrap().is_none());
    }

    // ========== Start selection ==========

    #[test]
    fn resolve_start_prefers_requested_file() {
        let (_storage, catalog) = catalog_with(&[
            "2024-01-01/2024-01-01_09-00-00_SVGA_10_30s.avi",
            "2024-01-02/2024-01-02_08-00-00_SVGA_10_30s.avi",
        ]);
        let requested = Path::new("2024-01-02/2024-01-02_08-00-00_SVGA_10_30s.avi");
        let start = catalog.resolve_start(Some(requested)).unwrap().unwrap();
        assert_eq!(start, Path::new("/sd").join(requested));
    }

    #[test]
    fn resolve_start_falls_back_to_first() {
        let (_storage, catalog) = catalog_with(&[
            "2024-01-02/2024-01-02_08-00-00_SVGA_10_30s.avi",
            "2024-01-01/2024-01-01_09-00-00_SVGA_10_30s.avi",
        ]);
        let start = catalog
            .resolve_start(Some(Path::new("/sd/2023-12-31/missing.avi")))
            .unwrap()
            .unwrap();
        assert!(start.ends_with("2024-01-01_09-00-00_SVGA_10_30s.avi"));

        // The temporary file is never a valid start
        let start = catalog
            .resolve_start(Some(Path::new("/sd/avi_temp.avi")))
            .unwrap()
            .unwrap();
        assert!(start.ends_with("2024-01-01_09-00-00_SVGA_10_30s.avi"));
    }

    // ========== Listing and deletion ==========

    #[test]
    fn list_parses_metadata() {
        let (_storage, catalog) = catalog_with(&[
            "2024-01-01/2024-01-01_09-00-00_HD_12_45s.avi",
            "2024-01-01/garbage.avi",
        ]);
        let list = catalog.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].size_tag, "HD");
        assert_eq!(list[0].fps, 12);
        assert_eq!(list[0].duration_secs, 45);
        assert_eq!(list[0].size_bytes, 10);
    }

    #[test]
    fn delete_removes_recording() {
        let (storage, catalog) = catalog_with(&["2024-01-01/2024-01-01_09-00-00_HD_12_45s.avi"]);
        let path = Path::new("/sd/2024-01-01/2024-01-01_09-00-00_HD_12_45s.avi");
        catalog.delete(path).unwrap();
        assert!(!storage.exists(path));
        assert!(catalog.delete(path).is_err());
    }

    #[test]
    fn delete_refuses_temp_and_outside_paths() {
        let (storage, catalog) = catalog_with(&["avi_temp.avi"]);
        assert!(catalog.delete(Path::new("avi_temp.avi")).is_err());
        assert!(storage.exists(Path::new("/sd/avi_temp.avi")));
        assert!(catalog.delete(Path::new("/etc/passwd.avi")).is_err());
        assert!(catalog.delete(Path::new("/sd/notes.txt")).is_err());
    }

    #[test]
    fn parent_components_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let victim = dir.path().join("victim.avi");
        std::fs::write(&victim, b"keep").unwrap();
        std::fs::create_dir(root.join("2024-01-01")).unwrap();
        std::fs::write(root.join("2024-01-01/ok.avi"), b"x").unwrap();

        let storage = Arc::new(crate::storage::LocalStorage::new(&root).unwrap());
        let catalog = RecordingCatalog::new(storage);

        assert!(!catalog.is_playable(Path::new("../victim.avi")));
        assert!(!catalog.is_playable(&root.join("../victim.avi")));
        assert!(!catalog.is_playable(Path::new("2024-01-01/../../victim.avi")));
        assert!(catalog.is_playable(Path::new("2024-01-01/ok.avi")));

        assert!(catalog.delete(Path::new("../victim.avi")).is_err());
        assert!(catalog.delete(&root.join("2024-01-01/../../victim.avi")).is_err());
        assert!(victim.exists());

        // Falls back to the earliest recording instead of the escaped path
        let start = catalog
            .resolve_start(Some(Path::new("../victim.avi")))
            .unwrap()
            .unwrap();
        assert!(start.ends_with("2024-01-01/ok.avi"));
    }
}
