//! Distribution hub
//!
//! Single loop that pulls frames from the camera and fans each one out to
//! the stream channel, the recording channel and the event channel,
//! depending on which of them currently needs frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{EventGate, MotionSensor, DEFAULT_MOTION_COOLDOWN};
use crate::playback::PlaybackControl;
use crate::recorder::RecordingControl;
use crate::sink::TransportState;
use crate::timer::FrameTimer;
use crate::{FrameSource, SharedFrame};

/// Hub timing
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Bounded wait when the stream channel is full
    pub stream_timeout: Duration,
    /// Bounded wait when the recording channel is full
    pub record_timeout: Duration,
    /// Sleep when no consumer needs frames
    pub idle_sleep: Duration,
    /// Minimum time between motion events
    pub motion_cooldown: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            stream_timeout: Duration::from_millis(100),
            record_timeout: Duration::from_millis(50),
            idle_sleep: Duration::from_millis(10),
            motion_cooldown: DEFAULT_MOTION_COOLDOWN,
        }
    }
}

/// Channels the hub feeds
pub struct HubOutputs {
    pub stream: mpsc::Sender<SharedFrame>,
    pub record: mpsc::Sender<SharedFrame>,
    pub event: mpsc::Sender<SharedFrame>,
}

/// Shared flags the hub reads each iteration
#[derive(Clone)]
pub struct HubInputs {
    pub transport: TransportState,
    pub recording: RecordingControl,
    pub playback: PlaybackControl,
    pub motion: Arc<dyn MotionSensor>,
}

/// Statistics about hub activity (returned as a snapshot from atomic counters)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct HubStats {
    pub frames_captured: u64,
    pub frames_streamed: u64,
    pub frames_recorded: u64,
    pub events_sent: u64,
    pub frames_dropped: u64,
    pub frames_malformed: u64,
}

#[derive(Default)]
struct AtomicHubStats {
    frames_captured: AtomicU64,
    frames_streamed: AtomicU64,
    frames_recorded: AtomicU64,
    events_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_malformed: AtomicU64,
}

impl AtomicHubStats {
    fn snapshot(&self) -> HubStats {
        HubStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            frames_recorded: self.frames_recorded.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of the hub counters
#[derive(Clone)]
pub struct HubStatsHandle(Arc<AtomicHubStats>);

impl HubStatsHandle {
    pub fn snapshot(&self) -> HubStats {
        self.0.snapshot()
    }
}

/// What one hub iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nobody needed a frame
    Idle,
    /// The source had no frame
    NoFrame,
    /// Frame failed validation and was released
    Malformed,
    /// Frame was distributed
    Distributed,
}

/// Distribution hub
pub struct DistributionHub {
    source: Arc<dyn FrameSource>,
    outputs: HubOutputs,
    inputs: HubInputs,
    config: HubConfig,
    event_gate: EventGate,
    timer: Option<FrameTimer>,
    stats: Arc<AtomicHubStats>,
}

impl DistributionHub {
    pub fn new(
        source: Arc<dyn FrameSource>,
        outputs: HubOutputs,
        inputs: HubInputs,
        config: HubConfig,
    ) -> Self {
        let event_gate = EventGate::new(config.motion_cooldown);
        Self {
            source,
            outputs,
            inputs,
            config,
            event_gate,
            timer: None,
            stats: Arc::new(AtomicHubStats::default()),
        }
    }

    /// Wait for a timer tick before every acquisition
    pub fn with_timer(mut self, timer: FrameTimer) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn stats(&self) -> HubStatsHandle {
        HubStatsHandle(self.stats.clone())
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Distribution hub running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.step() => {}
            }
        }
        info!("Distribution hub stopped");
    }

    /// One iteration: evaluate consumers, acquire, distribute, release
    pub async fn step(&self) -> Step {
        // Playback owns the stream channel while it is active
        let stream_needed = !self.inputs.playback.is_active() && self.inputs.transport.is_ready();
        let record_needed = self.inputs.recording.is_armed();
        let event_needed = self.inputs.motion.is_triggered() && self.event_gate.is_due();

        if !stream_needed && !record_needed && !event_needed {
            tokio::time::sleep(self.config.idle_sleep).await;
            return Step::Idle;
        }

        if let Some(timer) = &self.timer {
            timer.tick().await;
        }

        let source = self.source.clone();
        let Some(raw) = tokio::task::block_in_place(|| source.acquire()) else {
            debug!("No frame from source");
            tokio::time::sleep(self.config.idle_sleep).await;
            return Step::NoFrame;
        };
        self.stats.frames_captured.fetch_add(1, Ordering::Relaxed);

        let frame = SharedFrame::from_source(raw, source);
        if let Err(e) = frame.check_jpeg() {
            warn!("Dropping frame: {}", e);
            self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
            return Step::Malformed;
        }

        if stream_needed {
            match self
                .outputs
                .stream
                .send_timeout(frame.share(), self.config.stream_timeout)
                .await
            {
                Ok(()) => {
                    self.stats.frames_streamed.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!("Stream channel full, frame dropped");
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Closed(_)) => debug!("Stream channel closed"),
            }
        }

        if record_needed {
            match self
                .outputs
                .record
                .send_timeout(frame.share(), self.config.record_timeout)
                .await
            {
                Ok(()) => {
                    self.stats.frames_recorded.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!("Recording channel full, frame dropped");
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(SendTimeoutError::Closed(_)) => debug!("Recording channel closed"),
            }
        }

        if event_needed {
            match self.outputs.event.try_send(frame.share()) {
                Ok(()) => {
                    self.event_gate.mark();
                    self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
                    info!("Motion detected, event frame queued");
                }
                Err(TrySendError::Full(_)) => {
                    debug!("Event upload in progress, frame skipped");
                }
                Err(TrySendError::Closed(_)) => debug!("Event channel closed"),
            }
        }

        frame.release();
        Step::Distributed
    }
}
