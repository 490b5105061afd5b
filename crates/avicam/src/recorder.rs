//! Recording worker
//!
//! Consumes frames from the recording channel and writes them into one AVI
//! file at a time. A file is opened on the first frame after recording is
//! armed and closed when recording is disarmed, the frame cap is reached, or
//! the worker shuts down. Closed files are renamed after their start time,
//! frame size, measured frame rate and duration, or removed when shorter
//! than the minimum duration.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::avi::{AviWriter, FrameSize, DEFAULT_WRITE_BUFFER};
use crate::catalog::{RecordingCatalog, RecordingName};
use crate::storage::{Storage, StorageFile};
use crate::SharedFrame;

/// Recording parameters
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Frame size written into the header and file name
    pub frame_size: FrameSize,
    /// Nominal capture rate used for the placeholder header
    pub fps: u32,
    /// Frames per file before it is closed automatically
    pub max_frames: u32,
    /// Recordings shorter than this are discarded
    pub min_seconds: u64,
    /// In-memory write buffer size in bytes
    pub write_buffer: usize,
    /// Below this much free space recording is disabled after a close
    pub min_free_bytes: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::Svga,
            fps: 10,
            max_frames: 300,
            min_seconds: 5,
            write_buffer: DEFAULT_WRITE_BUFFER,
            min_free_bytes: 0,
        }
    }
}

/// Arm/disarm switch shared by the control surface, hub and recorder
#[derive(Clone)]
pub struct RecordingControl {
    armed: Arc<watch::Sender<bool>>,
    storage_full: Arc<AtomicBool>,
}

impl RecordingControl {
    pub fn new(armed: bool) -> Self {
        let (tx, _rx) = watch::channel(armed);
        Self {
            armed: Arc::new(tx),
            storage_full: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enable recording; clears a previous storage-full condition
    pub fn arm(&self) {
        self.storage_full.store(false, Ordering::SeqCst);
        self.armed.send_replace(true);
    }

    /// Disable recording; the open file is closed by the worker
    pub fn disarm(&self) {
        self.armed.send_replace(false);
    }

    pub fn is_armed(&self) -> bool {
        *self.armed.borrow()
    }

    /// True if recording was disabled because storage ran low
    pub fn is_storage_full(&self) -> bool {
        self.storage_full.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.armed.subscribe()
    }

    fn disable_storage_full(&self) {
        self.storage_full.store(true, Ordering::SeqCst);
        self.armed.send_replace(false);
    }
}

/// Recorder counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecorderStats {
    pub frames_written: u64,
    pub files_kept: u64,
    pub files_discarded: u64,
    pub sessions_aborted: u64,
}

#[derive(Default)]
struct AtomicRecorderStats {
    frames_written: AtomicU64,
    files_kept: AtomicU64,
    files_discarded: AtomicU64,
    sessions_aborted: AtomicU64,
}

impl AtomicRecorderStats {
    fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            files_kept: self.files_kept.load(Ordering::Relaxed),
            files_discarded: self.files_discarded.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
        }
    }
}

/// Result of closing a recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// File renamed to its final path
    Kept(PathBuf),
    /// File removed for being too short
    Discarded,
}

/// One open AVI file
struct RecordingSession {
    writer: AviWriter<Box<dyn StorageFile>>,
    started_at: DateTime<Local>,
    started: Instant,
    temp_path: PathBuf,
}

impl RecordingSession {
    fn open(catalog: &RecordingCatalog, config: &RecorderConfig, buffer: Vec<u8>) -> Result<Self> {
        let storage = catalog.storage();
        let started_at = Local::now();
        let day_dir = storage
            .root()
            .join(started_at.format("%Y-%m-%d").to_string());
        storage.create_dir_all(&day_dir)?;

        let temp_path = catalog.temp_path();
        if storage.exists(&temp_path) {
            info!("Removing stale temporary file {:?}", temp_path);
            storage.remove(&temp_path)?;
        }

        let file = storage.create(&temp_path)?;
        let writer = match AviWriter::with_buffer(
            file,
            buffer,
            config.frame_size,
            config.fps,
            config.write_buffer,
            config.max_frames,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = storage.remove(&temp_path);
                return Err(e);
            }
        };

        info!("Recording started: {:?}", temp_path);
        Ok(Self {
            writer,
            started_at,
            started: Instant::now(),
            temp_path,
        })
    }

    fn close(
        self,
        storage: &dyn Storage,
        config: &RecorderConfig,
        buffer: &mut Option<Vec<u8>>,
    ) -> Result<CloseOutcome> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let frames = self.writer.frame_count();
        let fps = actual_fps(frames, elapsed_ms, config.fps);

        let (file, summary, emptied) = self.writer.finish_reusing(fps)?;
        drop(file);
        *buffer = Some(emptied);

        let duration_secs = elapsed_ms / 1000;
        if duration_secs < config.min_seconds {
            info!(
                "Recording too short ({}s < {}s), removing {:?}",
                duration_secs, config.min_seconds, self.temp_path
            );
            storage.remove(&self.temp_path)?;
            return Ok(CloseOutcome::Discarded);
        }

        let name = RecordingName {
            started_at: self.started_at.naive_local(),
            size_tag: config.frame_size.tag().to_string(),
            fps,
            duration_secs,
        };
        let dest = storage.root().join(name.relative_path());
        if let Some(parent) = dest.parent() {
            storage.create_dir_all(parent)?;
        }
        if storage.exists(&dest) {
            storage.remove(&self.temp_path)?;
            bail!("Recording {:?} already exists, dropping newer segment", dest);
        }
        if let Err(e) = storage.rename(&self.temp_path, &dest) {
            let _ = storage.remove(&self.temp_path);
            return Err(e);
        }

        let write_secs = summary.write_time.as_secs_f64();
        let avg_chunk = if summary.frames > 0 {
            summary.data_bytes / summary.frames as u64
        } else {
            0
        };
        info!(
            path = %dest.display(),
            duration_secs,
            frames = summary.frames,
            configured_fps = config.fps,
            actual_fps = fps,
            size_kb = summary.file_len / 1024,
            avg_chunk,
            write_ms = summary.write_time.as_millis() as u64,
            "Recording saved"
        );
        if write_secs > 0.0 {
            debug!(
                "Write throughput: {:.1} KB/s",
                summary.file_len as f64 / 1024.0 / write_secs
            );
        }
        Ok(CloseOutcome::Kept(dest))
    }
}

/// Measured frame rate, `round(frames * 1000 / elapsed_ms)`, at least 1
/// when any frame was written.
pub fn actual_fps(frames: u32, elapsed_ms: u64, nominal_fps: u32) -> u32 {
    if frames == 0 {
        return 0;
    }
    if elapsed_ms == 0 {
        return nominal_fps.clamp(1, u8::MAX as u32);
    }
    let fps = (frames as u64 * 1000 + elapsed_ms / 2) / elapsed_ms;
    fps.clamp(1, u8::MAX as u64) as u32
}

/// Recording worker
pub struct Recorder {
    config: RecorderConfig,
    catalog: RecordingCatalog,
    control: RecordingControl,
    stats: Arc<AtomicRecorderStats>,
    session: Option<RecordingSession>,
    buffer: Option<Vec<u8>>,
}

/// Cheap handle for reading recorder counters
#[derive(Clone)]
pub struct RecorderStatsHandle(Arc<AtomicRecorderStats>);

impl RecorderStatsHandle {
    pub fn snapshot(&self) -> RecorderStats {
        self.0.snapshot()
    }
}

impl Recorder {
    /// Create a recorder; fails if the write buffer cannot be allocated
    pub fn new(
        config: RecorderConfig,
        storage: Arc<dyn Storage>,
        control: RecordingControl,
    ) -> Result<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(config.write_buffer)
            .context("Failed to allocate recording buffer")?;
        Ok(Self {
            config,
            catalog: RecordingCatalog::new(storage),
            control,
            stats: Arc::new(AtomicRecorderStats::default()),
            session: None,
            buffer: Some(buffer),
        })
    }

    pub fn stats(&self) -> RecorderStatsHandle {
        RecorderStatsHandle(self.stats.clone())
    }

    /// True while a file is open
    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Run until the channel closes or `cancel` fires; any open file is
    /// closed before returning.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SharedFrame>, cancel: CancellationToken) {
        let mut armed_rx = self.control.subscribe();
        info!(
            "Recorder running (max {} frames/file, min {}s)",
            self.config.max_frames, self.config.min_seconds
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => break,
                },
                changed = armed_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let armed = *armed_rx.borrow_and_update();
                    if !armed && self.session.is_some() {
                        info!("Recording disarmed");
                        self.close_session();
                    }
                }
            }
        }

        if self.session.is_some() {
            self.close_session();
        }
        info!("Recorder stopped");
    }

    /// Write one frame, opening or closing files as needed
    pub fn handle_frame(&mut self, frame: SharedFrame) {
        if !self.control.is_armed() {
            if self.session.is_some() {
                self.close_session();
            }
            debug!("Recording not armed, frame dropped");
            return;
        }

        if self.session.is_none() {
            let buffer = self.buffer.take().unwrap_or_default();
            let opened = tokio::task::block_in_place(|| {
                RecordingSession::open(&self.catalog, &self.config, buffer)
            });
            match opened {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    error!("Failed to open recording: {:#}", e);
                    self.stats.sessions_aborted.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let written = tokio::task::block_in_place(|| session.writer.write_frame(&frame.payload));
        drop(frame);

        match written {
            Ok(()) => {
                self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                if session.writer.is_full() {
                    info!("Frame cap of {} reached", self.config.max_frames);
                    self.close_session();
                }
            }
            Err(e) => {
                error!("Recording write failed: {:#}", e);
                self.abort_session();
            }
        }
    }

    /// Finalize the open file and check free space afterwards
    pub fn close_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let storage = self.catalog.storage().clone();
        let buffer = &mut self.buffer;
        let config = &self.config;
        let result = tokio::task::block_in_place(|| {
            session
                .close(storage.as_ref(), config, buffer)
                .context("Failed to close recording")
        });
        match result {
            Ok(CloseOutcome::Kept(_)) => {
                self.stats.files_kept.fetch_add(1, Ordering::Relaxed);
            }
            Ok(CloseOutcome::Discarded) => {
                self.stats.files_discarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("{:#}", e);
                self.stats.sessions_aborted.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.check_free_space(storage.as_ref());
    }

    fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            let temp_path = session.temp_path.clone();
            drop(session);
            let storage = self.catalog.storage().clone();
            if let Err(e) = tokio::task::block_in_place(|| storage.remove(&temp_path)) {
                warn!("Failed to remove aborted recording: {:#}", e);
            }
            self.stats.sessions_aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn check_free_space(&self, storage: &dyn Storage) {
        if self.config.min_free_bytes == 0 {
            return;
        }
        match storage.available_bytes() {
            Ok(Some(available)) if available < self.config.min_free_bytes => {
                warn!(
                    "Storage nearly full ({} bytes free), recording disabled",
                    available
                );
                self.control.disable_storage_full();
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to query free space: {:#}", e),
        }
    }
}
