//! Avicam - camera node core
//!
//! Captures MJPEG frames, fans them out to a live stream, an AVI recorder
//! and a motion-event path, and replays stored recordings through the same
//! streaming path.
//!
//! - **Core types**: FrameBuffer, PixelFormat, SharedFrame, FrameSource
//! - **`avi`**: AVI container writer and reader
//! - **`storage`**: Local filesystem and in-memory storage backends
//! - **`catalog`**: Recording file naming, ordering, listing
//! - **`recorder`** / **`playback`**: Recording and playback workers
//! - **`hub`**, **`sink`**, **`event`**, **`timer`**: Live distribution path
//! - **`node`**: Wires everything together behind a control handle
//! - **`test-source`** feature: Synthetic frames without camera hardware

mod frame;
mod shared;
mod source;

pub use frame::{FrameBuffer, PixelFormat, JPEG_SOI, MAX_JPEG_SIZE};
pub use shared::SharedFrame;
pub use source::FrameSource;
#[cfg(any(test, feature = "test-source"))]
pub use source::{TestSource, TestSourceConfig};

pub mod avi;
pub mod catalog;
pub mod config;
pub mod event;
pub mod hub;
pub mod node;
pub mod playback;
pub mod recorder;
pub mod sink;
pub mod storage;
pub mod timer;

pub use config::NodeConfig;
pub use node::{CameraNode, NodeHandle, NodeStatus};
