//! Camera node wiring
//!
//! [`CameraNode`] collects the collaborators (frame source, stream sink,
//! storage, motion sensor, event uploader), creates the bounded channels and
//! spawns every worker on the current tokio runtime. The returned
//! [`NodeHandle`] is the recording/playback control surface.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{RecordingCatalog, RecordingInfo};
use crate::config::NodeConfig;
use crate::event::{EventUploader, EventWorker, MotionLine, MotionSensor};
use crate::hub::{DistributionHub, HubInputs, HubOutputs, HubStats, HubStatsHandle};
use crate::playback::{PlaybackControl, PlaybackEngine};
use crate::recorder::{Recorder, RecorderStats, RecorderStatsHandle, RecordingControl};
use crate::sink::{SinkGate, SinkStats, StreamSink, StreamWorker, TransportState};
use crate::storage::{LocalStorage, Storage};
use crate::timer::FrameTimer;
use crate::FrameSource;

/// Point-in-time view of the node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub recording_armed: bool,
    pub storage_full: bool,
    pub playback_active: bool,
    pub playback_file: Option<PathBuf>,
    pub hub: HubStats,
    pub recorder: RecorderStats,
    pub sink: SinkStats,
}

/// Builder for a camera node
pub struct CameraNode {
    config: NodeConfig,
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn StreamSink>,
    storage: Option<Arc<dyn Storage>>,
    transport: TransportState,
    motion: Arc<dyn MotionSensor>,
    uploader: Option<Arc<dyn EventUploader>>,
}

impl CameraNode {
    pub fn new(config: NodeConfig, source: Arc<dyn FrameSource>, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            config,
            source,
            sink,
            storage: None,
            transport: TransportState::new(),
            motion: Arc::new(MotionLine::new()),
            uploader: None,
        }
    }

    /// Use this storage instead of a [`LocalStorage`] at the configured root
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Share connection state with the transport collaborator
    pub fn with_transport(mut self, transport: TransportState) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_motion(mut self, motion: Arc<dyn MotionSensor>) -> Self {
        self.motion = motion;
        self
    }

    /// Without an uploader motion frames are dropped
    pub fn with_uploader(mut self, uploader: Arc<dyn EventUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Spawn all workers. Must be called from within a tokio runtime.
    ///
    /// Fails if the storage root cannot be created or the recording buffers
    /// cannot be allocated; no worker is started in that case.
    pub fn start(self) -> Result<NodeHandle> {
        let config = self.config;

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => {
                let local = LocalStorage::new(config.storage_root.clone())
                    .context("Failed to open recording storage")?;
                Arc::new(local)
            }
        };
        let catalog = RecordingCatalog::new(storage.clone());

        let recording = RecordingControl::new(config.record_on_start);
        let playback = PlaybackControl::new();
        let recorder = Recorder::new(config.recorder(), storage.clone(), recording.clone())
            .context("Failed to set up recorder")?;
        let recorder_stats = recorder.stats();

        let (stream_tx, stream_rx) = mpsc::channel(config.stream_capacity.max(1));
        let (record_tx, record_rx) = mpsc::channel(config.record_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(recorder.run(record_rx, shutdown.clone())));

        let engine = PlaybackEngine::new(
            catalog.clone(),
            playback.clone(),
            stream_tx.clone(),
            config.playback_send_timeout,
        );
        tasks.push(tokio::spawn(engine.run(shutdown.clone())));

        let gate = Arc::new(SinkGate::new(self.sink, config.gate_timeout));
        let stream_worker = StreamWorker::new(gate.clone(), self.transport.clone());
        tasks.push(tokio::spawn(stream_worker.run(stream_rx, shutdown.clone())));

        match self.uploader {
            Some(uploader) => {
                let worker = EventWorker::new(uploader);
                tasks.push(tokio::spawn(worker.run(event_rx, shutdown.clone())));
            }
            None => {
                info!("No event uploader configured, motion events disabled");
                drop(event_rx);
            }
        }

        let timer = FrameTimer::start(config.fps, shutdown.clone());
        let hub = DistributionHub::new(
            self.source,
            HubOutputs {
                stream: stream_tx,
                record: record_tx,
                event: event_tx,
            },
            HubInputs {
                transport: self.transport.clone(),
                recording: recording.clone(),
                playback: playback.clone(),
                motion: self.motion,
            },
            config.hub(),
        )
        .with_timer(timer);
        let hub_stats = hub.stats();
        tasks.push(tokio::spawn(hub.run(shutdown.clone())));

        info!(
            root = %storage.root().display(),
            fps = config.fps,
            frame_size = %config.frame_size,
            recording = config.record_on_start,
            "Camera node started"
        );

        Ok(NodeHandle {
            recording,
            playback,
            transport: self.transport,
            catalog,
            gate,
            hub_stats,
            recorder_stats,
            resume_file: config.playback_file,
            shutdown,
            tasks,
        })
    }
}

/// Control surface of a running node
pub struct NodeHandle {
    recording: RecordingControl,
    playback: PlaybackControl,
    transport: TransportState,
    catalog: RecordingCatalog,
    gate: Arc<SinkGate>,
    hub_stats: HubStatsHandle,
    recorder_stats: RecorderStatsHandle,
    resume_file: Option<PathBuf>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn arm_recording(&self) {
        info!("Recording armed");
        self.recording.arm();
    }

    /// The recorder closes the open file on its own task
    pub fn disarm_recording(&self) {
        info!("Recording disarm requested");
        self.recording.disarm();
    }

    /// Start playback at `path`, or at the configured resume file, or at the
    /// earliest recording. Returns false if playback is already active.
    pub fn start_playback(&self, path: Option<PathBuf>) -> bool {
        let path = path.or_else(|| self.resume_file.clone());
        self.playback.start(path)
    }

    /// Returns false if playback was not active
    pub fn stop_playback(&self) -> bool {
        self.playback.stop()
    }

    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn catalog(&self) -> &RecordingCatalog {
        &self.catalog
    }

    /// Kept recordings, oldest first
    pub fn recordings(&self) -> Result<Vec<RecordingInfo>> {
        self.catalog.list()
    }

    pub fn delete_recording(&self, path: &Path) -> Result<()> {
        self.catalog.delete(path)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            recording_armed: self.recording.is_armed(),
            storage_full: self.recording.is_storage_full(),
            playback_active: self.playback.is_active(),
            playback_file: self.playback.current_file(),
            hub: self.hub_stats.snapshot(),
            recorder: self.recorder_stats.snapshot(),
            sink: self.gate.stats(),
        }
    }

    /// Stop every worker and wait for them; an open recording is finalized
    pub async fn shutdown(self) {
        info!("Camera node shutting down");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Worker task failed: {}", e);
            }
        }
        info!("Camera node stopped");
    }
}
