//! Motion event path
//!
//! When the motion line is high and the cooldown has elapsed, the hub hands
//! one frame to the event worker, which passes it to the uploader.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SharedFrame;

/// Default minimum time between two motion events
pub const DEFAULT_MOTION_COOLDOWN: Duration = Duration::from_millis(1000);

/// Receives motion snapshots (HTTP upload, notification service, ...)
#[async_trait::async_trait]
pub trait EventUploader: Send + Sync {
    async fn upload(&self, jpeg: &[u8]) -> Result<()>;
}

/// Motion sensor input
pub trait MotionSensor: Send + Sync {
    /// True while motion is detected
    fn is_triggered(&self) -> bool;
}

/// Motion line driven by an external sensor handler
#[derive(Clone, Default)]
pub struct MotionLine(Arc<AtomicBool>);

impl MotionLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, high: bool) {
        self.0.store(high, Ordering::SeqCst);
    }
}

impl MotionSensor for MotionLine {
    fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Enforces the cooldown between events
pub struct EventGate {
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

impl EventGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// True if an event may fire now
    pub fn is_due(&self) -> bool {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Record that an event fired
    pub fn mark(&self) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}

/// Forwards event frames to the uploader
pub struct EventWorker {
    uploader: Arc<dyn EventUploader>,
    uploaded: Arc<AtomicU64>,
}

impl EventWorker {
    pub fn new(uploader: Arc<dyn EventUploader>) -> Self {
        Self {
            uploader,
            uploaded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of successful uploads
    pub fn uploaded(&self) -> Arc<AtomicU64> {
        self.uploaded.clone()
    }

    pub async fn run(self, mut rx: mpsc::Receiver<SharedFrame>, shutdown: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            match self.uploader.upload(&frame.payload).await {
                Ok(()) => {
                    self.uploaded.fetch_add(1, Ordering::Relaxed);
                    info!("Motion event uploaded ({} bytes)", frame.len());
                }
                Err(e) => warn!("Motion event upload failed: {:#}", e),
            }
        }
    }
}
