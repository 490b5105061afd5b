//! Frame buffer types for captured and replayed video

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Largest JPEG payload accepted anywhere in the pipeline (1 MiB)
pub const MAX_JPEG_SIZE: usize = 1024 * 1024;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Pixel format tag carried with every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Motion-JPEG compressed frame
    Jpeg,
    /// Raw RGB565
    Rgb565,
    /// Raw YUV 4:2:2
    Yuv422,
    /// Raw 8-bit grayscale
    Grayscale,
}

/// A single captured (or replayed) video frame.
///
/// Immutable once built: the payload is a reference-counted [`Bytes`], so
/// cloning a `FrameBuffer` never copies pixel data.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Encoded frame data (JPEG for MJPEG capture)
    pub payload: Bytes,
    /// Payload format
    pub format: PixelFormat,
    /// Width in pixels (0 when unknown, e.g. replayed frames)
    pub width: u32,
    /// Height in pixels (0 when unknown)
    pub height: u32,
    /// Capture timestamp in microseconds since node start
    pub timestamp_us: u64,
}

impl FrameBuffer {
    /// Create a JPEG frame with unknown dimensions
    pub fn jpeg(payload: Bytes) -> Self {
        Self {
            payload,
            format: PixelFormat::Jpeg,
            width: 0,
            height: 0,
            timestamp_us: 0,
        }
    }

    /// Set the dimensions and return self (builder pattern)
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the timestamp and return self (builder pattern)
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Check that the frame looks like a complete JPEG image.
    ///
    /// Rejects raw-format frames, empty frames, frames above [`MAX_JPEG_SIZE`],
    /// and frames that do not start with the SOI marker. A rejected frame must
    /// not be forwarded to any sink.
    pub fn check_jpeg(&self) -> Result<()> {
        if self.format != PixelFormat::Jpeg {
            anyhow::bail!("Not a JPEG frame: {:?}", self.format);
        }
        let len = self.payload.len();
        if len == 0 || len > MAX_JPEG_SIZE {
            anyhow::bail!("Frame size out of bounds: {} bytes", len);
        }
        if len < 4 || self.payload[..2] != JPEG_SOI {
            anyhow::bail!("Corrupted JPEG: no SOI marker");
        }
        Ok(())
    }
}
