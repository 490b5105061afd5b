//! Playback engine
//!
//! Replays stored recordings, oldest first, into the same bounded channel
//! the live path uses to reach the stream sink. Frames are paced by each
//! file's stored frame rate. A stop request is honoured between chunks and
//! while waiting on the channel or the pacing delay.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::avi::AviReader;
use crate::catalog::RecordingCatalog;
use crate::{FrameBuffer, SharedFrame};

/// Default bound on a single channel send during playback
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(200);

struct ControlState {
    active: bool,
    pending: Option<Option<PathBuf>>,
    cancel: CancellationToken,
    generation: u64,
    current_file: Option<PathBuf>,
}

struct ControlInner {
    state: Mutex<ControlState>,
    wake: Notify,
}

/// Start/stop surface for the playback engine
#[derive(Clone)]
pub struct PlaybackControl {
    inner: Arc<ControlInner>,
}

/// A start request picked up by the engine
struct PlaybackRequest {
    path: Option<PathBuf>,
    cancel: CancellationToken,
    generation: u64,
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(ControlState {
                    active: false,
                    pending: None,
                    cancel: CancellationToken::new(),
                    generation: 0,
                    current_file: None,
                }),
                wake: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request playback, from `path` if it is playable or else from the
    /// earliest recording. Returns false if playback is already active.
    pub fn start(&self, path: Option<PathBuf>) -> bool {
        {
            let mut state = self.lock();
            if state.active {
                return false;
            }
            state.active = true;
            state.generation += 1;
            state.cancel = CancellationToken::new();
            state.pending = Some(path);
        }
        self.inner.wake.notify_one();
        true
    }

    /// Stop playback. A no-op returning false when playback is not active.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.active {
                return false;
            }
            state.active = false;
            state.pending = None;
            state.current_file = None;
            state.cancel.cancel();
        }
        self.inner.wake.notify_one();
        true
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// File currently being replayed
    pub fn current_file(&self) -> Option<PathBuf> {
        self.lock().current_file.clone()
    }

    fn take_request(&self) -> Option<PlaybackRequest> {
        let mut state = self.lock();
        let path = state.pending.take()?;
        Some(PlaybackRequest {
            path,
            cancel: state.cancel.clone(),
            generation: state.generation,
        })
    }

    fn set_current(&self, generation: u64, path: &Path) {
        let mut state = self.lock();
        if state.generation == generation && state.active {
            state.current_file = Some(path.to_path_buf());
        }
    }

    /// Mark the session finished unless a newer one has started since
    fn finish(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.active = false;
            state.current_file = None;
        }
    }

    async fn wait(&self) {
        self.inner.wake.notified().await;
    }
}

/// Playback worker
pub struct PlaybackEngine {
    catalog: RecordingCatalog,
    control: PlaybackControl,
    tx: mpsc::Sender<SharedFrame>,
    send_timeout: Duration,
}

impl PlaybackEngine {
    pub fn new(
        catalog: RecordingCatalog,
        control: PlaybackControl,
        tx: mpsc::Sender<SharedFrame>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            control,
            tx,
            send_timeout,
        }
    }

    /// Serve start requests until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Playback engine ready");
        loop {
            let request = loop {
                if let Some(request) = self.control.take_request() {
                    break request;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Playback engine stopped");
                        return;
                    }
                    _ = self.control.wait() => {}
                }
            };

            self.play_sequence(&request, &shutdown).await;
            self.control.finish(request.generation);
        }
    }

    async fn play_sequence(&self, request: &PlaybackRequest, shutdown: &CancellationToken) {
        let stopped = || request.cancel.is_cancelled() || shutdown.is_cancelled();

        let start = tokio::task::block_in_place(|| {
            self.catalog.resolve_start(request.path.as_deref())
        });
        let mut current = match start {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!("No recordings to play");
                return;
            }
            Err(e) => {
                warn!("Failed to scan recordings: {:#}", e);
                return;
            }
        };
        info!("Playback started at {:?}", current);

        loop {
            if stopped() {
                info!("Playback stopped");
                return;
            }
            self.control.set_current(request.generation, &current);

            match self.play_file(&current, request, shutdown).await {
                Ok(frames) => info!(frames, "Finished {:?}", current),
                Err(e) => warn!("Abandoning {:?}: {:#}", current, e),
            }
            if stopped() {
                info!("Playback stopped");
                return;
            }

            let next = tokio::task::block_in_place(|| self.catalog.next_after(&current));
            current = match next {
                Ok(Some(path)) => path,
                Ok(None) => {
                    info!("Playback reached the last recording");
                    return;
                }
                Err(e) => {
                    warn!("Failed to find next recording: {:#}", e);
                    return;
                }
            };
        }
    }

    /// Replay one file; returns the number of frames sent
    async fn play_file(
        &self,
        path: &Path,
        request: &PlaybackRequest,
        shutdown: &CancellationToken,
    ) -> Result<u64> {
        let storage = self.catalog.storage().clone();
        let mut reader = tokio::task::block_in_place(|| AviReader::open(storage.open(path)?))?;
        let delay = reader.frame_delay();
        debug!(fps = reader.fps(), ?delay, "Opened {:?}", path);

        let mut sent = 0u64;
        loop {
            if request.cancel.is_cancelled() || shutdown.is_cancelled() {
                break;
            }
            let payload = match tokio::task::block_in_place(|| reader.next_frame())? {
                Some(payload) => payload,
                None => break,
            };

            let frame = SharedFrame::owned(FrameBuffer::jpeg(payload));
            if let Err(e) = frame.check_jpeg() {
                warn!("Skipping malformed frame: {}", e);
                continue;
            }

            tokio::select! {
                biased;
                _ = request.cancel.cancelled() => break,
                _ = shutdown.cancelled() => break,
                res = self.tx.send_timeout(frame, self.send_timeout) => match res {
                    Ok(()) => sent += 1,
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!("Stream channel full, playback frame dropped");
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        return Err(anyhow!("Stream channel closed"));
                    }
                },
            }

            tokio::select! {
                _ = request.cancel.cancelled() => break,
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(sent)
    }
}
