//! Node configuration
//!
//! Every setting has a default matching the camera firmware; `from_env`
//! overrides them from `AVICAM_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::avi::{FrameSize, DEFAULT_WRITE_BUFFER};
use crate::event::DEFAULT_MOTION_COOLDOWN;
use crate::hub::HubConfig;
use crate::playback::DEFAULT_SEND_TIMEOUT;
use crate::recorder::RecorderConfig;
use crate::sink::DEFAULT_GATE_TIMEOUT;

/// Camera node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for recordings
    pub storage_root: PathBuf,
    /// Capture rate
    pub fps: u32,
    /// Capture frame size
    pub frame_size: FrameSize,
    /// Frames per recording file
    pub max_frames: u32,
    /// Recordings shorter than this are discarded
    pub min_seconds: u64,
    /// Recorder write buffer in bytes
    pub write_buffer: usize,
    /// Arm recording at startup
    pub record_on_start: bool,
    /// Disable recording when free space drops below this (0 = never)
    pub min_free_bytes: u64,
    /// Minimum time between motion events
    pub motion_cooldown: Duration,
    /// Recording to resume playback from
    pub playback_file: Option<PathBuf>,
    /// Stream channel capacity (frames)
    pub stream_capacity: usize,
    /// Recording channel capacity (frames)
    pub record_capacity: usize,
    /// Event channel capacity (frames)
    pub event_capacity: usize,
    /// Bounded wait for the stream channel
    pub stream_timeout: Duration,
    /// Bounded wait for the recording channel
    pub record_timeout: Duration,
    /// Bounded wait for a playback send
    pub playback_send_timeout: Duration,
    /// Bounded wait for the sink gate
    pub gate_timeout: Duration,
    /// Hub sleep when nothing needs frames
    pub idle_sleep: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/var/lib/avicam/recordings"),
            fps: 10,
            frame_size: FrameSize::Svga,
            max_frames: 300,
            min_seconds: 5,
            write_buffer: DEFAULT_WRITE_BUFFER,
            record_on_start: true,
            min_free_bytes: 0,
            motion_cooldown: DEFAULT_MOTION_COOLDOWN,
            playback_file: None,
            stream_capacity: 2,
            record_capacity: 10,
            event_capacity: 1,
            stream_timeout: Duration::from_millis(100),
            record_timeout: Duration::from_millis(50),
            playback_send_timeout: DEFAULT_SEND_TIMEOUT,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
            idle_sleep: Duration::from_millis(10),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage_root = std::env::var("AVICAM_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);

        // Recording on by default, disable with AVICAM_RECORD=0
        let record_on_start = std::env::var("AVICAM_RECORD")
            .map(|v| v != "0")
            .unwrap_or(defaults.record_on_start);

        let playback_file = std::env::var("AVICAM_PLAYBACK_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let motion_cooldown_ms = env_parse(
            "AVICAM_MOTION_COOLDOWN_MS",
            defaults.motion_cooldown.as_millis() as u64,
        );

        Self {
            storage_root,
            fps: env_parse("AVICAM_FPS", defaults.fps).max(1),
            frame_size: env_parse("AVICAM_FRAME_SIZE", defaults.frame_size),
            max_frames: env_parse("AVICAM_MAX_FRAMES", defaults.max_frames).max(1),
            min_seconds: env_parse("AVICAM_MIN_SECONDS", defaults.min_seconds),
            write_buffer: env_parse("AVICAM_WRITE_BUFFER", defaults.write_buffer),
            record_on_start,
            min_free_bytes: env_parse("AVICAM_MIN_FREE_BYTES", defaults.min_free_bytes),
            motion_cooldown: Duration::from_millis(motion_cooldown_ms),
            playback_file,
            ..defaults
        }
    }

    /// Recorder settings
    pub fn recorder(&self) -> RecorderConfig {
        RecorderConfig {
            frame_size: self.frame_size,
            fps: self.fps,
            max_frames: self.max_frames,
            min_seconds: self.min_seconds,
            write_buffer: self.write_buffer,
            min_free_bytes: self.min_free_bytes,
        }
    }

    /// Hub settings
    pub fn hub(&self) -> HubConfig {
        HubConfig {
            stream_timeout: self.stream_timeout,
            record_timeout: self.record_timeout,
            idle_sleep: self.idle_sleep,
            motion_cooldown: self.motion_cooldown,
        }
    }
}
