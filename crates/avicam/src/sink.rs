//! Streaming sink gate and stream worker
//!
//! The outbound transport handle is shared by the live path and playback.
//! [`SinkGate`] serialises access to it: the lock is taken under a bounded
//! wait and held only for a single send.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SharedFrame;

/// Default bound on acquiring the gate
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_millis(100);

/// Outbound media channel of the real-time transport
#[async_trait::async_trait]
pub trait StreamSink: Send + Sync {
    /// Send one encoded frame
    async fn send(&self, data: &[u8]) -> Result<()>;
}

/// Connection state reported by the transport collaborator
#[derive(Clone, Default)]
pub struct TransportState {
    connected: Arc<AtomicBool>,
    channel_open: Arc<AtomicBool>,
}

impl TransportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_channel_open(&self, open: bool) {
        self.channel_open.store(open, Ordering::SeqCst);
    }

    /// Peer connected and media channel open
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.channel_open.load(Ordering::SeqCst)
    }
}

/// Outcome of a gated send that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSend {
    Sent,
    /// Gate not acquired within the timeout; frame dropped
    Busy,
}

/// Statistics about sink usage (returned as a snapshot from atomic counters)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SinkStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub send_errors: u64,
}

#[derive(Default)]
struct AtomicSinkStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    send_errors: AtomicU64,
}

/// Mutual-exclusion gate around the stream sink
pub struct SinkGate {
    sink: Mutex<Arc<dyn StreamSink>>,
    timeout: Duration,
    stats: AtomicSinkStats,
}

impl SinkGate {
    pub fn new(sink: Arc<dyn StreamSink>, timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            timeout,
            stats: AtomicSinkStats::default(),
        }
    }

    /// Send one frame through the sink, waiting at most the gate timeout
    /// for another sender to finish.
    pub async fn send(&self, frame: &SharedFrame) -> Result<GateSend> {
        let sink = match tokio::time::timeout(self.timeout, self.sink.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(GateSend::Busy);
            }
        };
        match sink.send(&frame.payload).await {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(GateSend::Sent)
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            send_errors: self.stats.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Drains the stream channel into the sink gate
pub struct StreamWorker {
    gate: Arc<SinkGate>,
    transport: TransportState,
}

impl StreamWorker {
    pub fn new(gate: Arc<SinkGate>, transport: TransportState) -> Self {
        Self { gate, transport }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<SharedFrame>, shutdown: CancellationToken) {
        info!("Stream worker running");
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if !self.transport.is_ready() {
                debug!("Transport not ready, frame dropped");
                continue;
            }
            match self.gate.send(&frame).await {
                Ok(GateSend::Sent) => {}
                Ok(GateSend::Busy) => warn!("Stream sink busy, frame dropped"),
                Err(e) => warn!("Stream send failed: {:#}", e),
            }
        }
        info!("Stream worker stopped");
    }
}
