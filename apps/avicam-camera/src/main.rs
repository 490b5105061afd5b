//! Avicam Camera Binary
//!
//! Runs a camera node: live streaming, AVI recording to local storage and
//! playback of stored recordings.
//!
//! ## Usage
//!
//! ```bash
//! # Record into a custom directory at 15 fps
//! AVICAM_STORAGE_ROOT=/mnt/sd AVICAM_FPS=15 avicam-camera
//!
//! # Stream only, replay stored recordings on start
//! AVICAM_RECORD=0 avicam-camera --playback
//! ```

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use avicam::event::{EventUploader, MotionLine};
use avicam::sink::{StreamSink, TransportState};
use avicam::{CameraNode, FrameSource, NodeConfig};

/// Stream sink that only counts and logs frames
#[derive(Default)]
struct LoggingSink {
    frames: AtomicU64,
}

#[async_trait::async_trait]
impl StreamSink for LoggingSink {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 0 {
            info!("Streamed {} frames (last {} bytes)", n, data.len());
        } else {
            debug!("Streamed frame {} ({} bytes)", n, data.len());
        }
        Ok(())
    }
}

/// Event uploader that logs motion snapshots
struct LoggingUploader;

#[async_trait::async_trait]
impl EventUploader for LoggingUploader {
    async fn upload(&self, jpeg: &[u8]) -> Result<()> {
        info!("Motion snapshot ({} bytes)", jpeg.len());
        Ok(())
    }
}

fn frame_source(config: &NodeConfig) -> Result<Arc<dyn FrameSource>> {
    #[cfg(feature = "test-source")]
    {
        let (width, height) = config.frame_size.dimensions();
        info!("Starting test frame source");
        Ok(Arc::new(avicam::TestSource::new(avicam::TestSourceConfig {
            width,
            height,
            ..Default::default()
        })))
    }
    #[cfg(not(feature = "test-source"))]
    {
        let _ = config;
        anyhow::bail!("No camera source available. Rebuild with --features test-source");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("avicam=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = NodeConfig::from_env();
    let args: Vec<String> = std::env::args().collect();
    let playback_on_start = args.iter().any(|arg| arg == "--playback");

    info!("Avicam Camera starting");
    info!("  Storage: {}", config.storage_root.display());
    info!("  Video: {} @ {}fps", config.frame_size, config.fps);
    info!(
        "  Recording: {} ({} frames/file, min {}s)",
        if config.record_on_start { "armed" } else { "disarmed" },
        config.max_frames,
        config.min_seconds
    );

    let source = frame_source(&config)?;

    // No peer transport in this binary: treat the sink as always connected
    let transport = TransportState::new();
    transport.set_connected(true);
    transport.set_channel_open(true);

    let node = CameraNode::new(config, source, Arc::new(LoggingSink::default()))
        .with_transport(transport)
        .with_motion(Arc::new(MotionLine::new()))
        .with_uploader(Arc::new(LoggingUploader))
        .start()?;

    if playback_on_start && !node.start_playback(None) {
        info!("Playback already active");
    }

    let mut status_interval = tokio::time::interval(Duration::from_secs(30));
    status_interval.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
            _ = status_interval.tick() => {
                let status = node.status();
                info!(
                    captured = status.hub.frames_captured,
                    recorded = status.recorder.frames_written,
                    files = status.recorder.files_kept,
                    dropped = status.hub.frames_dropped,
                    playback = status.playback_active,
                    "Status"
                );
            }
        }
    }

    node.shutdown().await;
    Ok(())
}
