//! AVI (RIFF) container codec for MJPEG recordings
//!
//! Files are laid out as a fixed 310-byte header, a `movi` list of `00dc`
//! frame chunks padded to 4 bytes, and a trailing `idx1` index with one
//! 16-byte entry per frame. The header is written as a placeholder when a
//! file is opened and rewritten in place once the final counts are known.

mod reader;
mod writer;

pub use reader::AviReader;
pub use writer::{AviIndex, AviSummary, AviWriter};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of the fixed header, up to and including the `movi` list type
pub const AVI_HEADER_LEN: usize = 310;

/// Chunk header: 4-byte tag + 4-byte little-endian length
pub const CHUNK_HEADER_LEN: usize = 8;

/// One `idx1` record: tag, flags, offset, length
pub const INDEX_ENTRY_LEN: usize = 16;

/// Stream 0 compressed video chunk tag
pub const VIDEO_CHUNK_TAG: [u8; 4] = *b"00dc";

/// Index chunk tag
pub const INDEX_TAG: [u8; 4] = *b"idx1";

pub const RIFF_TAG: [u8; 4] = *b"RIFF";
pub const LIST_TAG: [u8; 4] = *b"LIST";
pub const MOVI_TAG: [u8; 4] = *b"movi";

/// Default in-memory write buffer used by the recorder (128 KiB)
pub const DEFAULT_WRITE_BUFFER: usize = 128 * 1024;

/// Frame rate used for playback when the stored rate is implausible
pub const DEFAULT_PLAYBACK_FPS: u32 = 10;

/// Highest stored frame rate playback accepts as-is
pub const MAX_PLAYBACK_FPS: u32 = 60;

// Patch points inside the header
const RIFF_SIZE_OFFSET: usize = 0x04;
const USECS_PER_FRAME_OFFSET: usize = 0x20;
const TOTAL_FRAMES_OFFSET: usize = 0x30;
const AVIH_WIDTH_OFFSET: usize = 0x40;
const AVIH_HEIGHT_OFFSET: usize = 0x44;
pub(crate) const FRAME_RATE_OFFSET: usize = 0x84;
const STREAM_LENGTH_OFFSET: usize = 0x8C;
const STRF_WIDTH_OFFSET: usize = 0xA8;
const STRF_HEIGHT_OFFSET: usize = 0xAC;
const MOVI_SIZE_OFFSET: usize = 0x12E;

/// MJPEG header template. `hdrl` carries a video stream and an (unused)
/// PCM audio stream description; the `movi` list header closes it.
#[rustfmt::skip]
pub const AVI_HEADER_TEMPLATE: [u8; AVI_HEADER_LEN] = [
    0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x41, 0x56, 0x49, 0x20,
    0x4C, 0x49, 0x53, 0x54, 0x16, 0x01, 0x00, 0x00, 0x68, 0x64, 0x72, 0x6C,
    0x61, 0x76, 0x69, 0x68, 0x38, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE0, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x4C, 0x49, 0x53, 0x54, 0x6C, 0x00, 0x00, 0x00,
    0x73, 0x74, 0x72, 0x6C, 0x73, 0x74, 0x72, 0x68, 0x30, 0x00, 0x00, 0x00,
    0x76, 0x69, 0x64, 0x73, 0x4D, 0x4A, 0x50, 0x47, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x73, 0x74, 0x72, 0x66, 0x28, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x18, 0x00,
    0x4D, 0x4A, 0x50, 0x47, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x4C, 0x49, 0x53, 0x54, 0x56, 0x00, 0x00, 0x00, 0x73, 0x74, 0x72, 0x6C,
    0x73, 0x74, 0x72, 0x68, 0x30, 0x00, 0x00, 0x00, 0x61, 0x75, 0x64, 0x73,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x11, 0x2B, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x11, 0x2B, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x73, 0x74, 0x72, 0x66,
    0x12, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x11, 0x2B, 0x00, 0x00,
    0x11, 0x2B, 0x00, 0x00, 0x02, 0x00, 0x10, 0x00, 0x00, 0x00, 0x4C, 0x49,
    0x53, 0x54, 0x00, 0x00, 0x00, 0x00, 0x6D, 0x6F, 0x76, 0x69,
];

/// Camera frame sizes the recorder knows how to describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameSize {
    /// 320x240
    Qvga,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x720
    Hd,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 7] = [
        FrameSize::Qvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Hd,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    /// (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    /// Tag used in recording file names
    pub fn tag(&self) -> &'static str {
        match self {
            FrameSize::Qvga => "QVGA",
            FrameSize::Vga => "VGA",
            FrameSize::Svga => "SVGA",
            FrameSize::Xga => "XGA",
            FrameSize::Hd => "HD",
            FrameSize::Sxga => "SXGA",
            FrameSize::Uxga => "UXGA",
        }
    }

    /// Parse a file-name tag (case-insensitive)
    pub fn from_tag(tag: &str) -> Option<FrameSize> {
        Self::ALL
            .into_iter()
            .find(|size| size.tag().eq_ignore_ascii_case(tag))
    }
}

impl std::str::FromStr for FrameSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Self::from_tag(s).ok_or_else(|| anyhow::anyhow!("Unknown frame size: {}", s))
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Padding needed to bring a chunk payload to a 4-byte boundary
pub fn chunk_padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Microseconds per frame for the `avih` header, `round(1_000_000 / fps)`
pub fn frame_interval_us(fps: u32) -> u32 {
    if fps == 0 {
        return 0;
    }
    (1_000_000 + fps / 2) / fps
}

/// Inter-frame delay for playback from a stored frame-rate byte
pub fn playback_delay(stored_fps: u8) -> Duration {
    let fps = match stored_fps as u32 {
        0 => DEFAULT_PLAYBACK_FPS,
        fps if fps > MAX_PLAYBACK_FPS => DEFAULT_PLAYBACK_FPS,
        fps => fps,
    };
    Duration::from_millis(1000 / fps as u64)
}

fn put_u32(header: &mut [u8; AVI_HEADER_LEN], offset: usize, value: u32) {
    header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Build a header with every patch point filled in.
///
/// `data_bytes` is the total size of all frame chunks (8-byte chunk headers
/// plus padded payloads). The RIFF size accounts for the header, the data
/// section and an `idx1` chunk of `frames` entries.
pub fn build_header(fps: u32, size: FrameSize, frames: u32, data_bytes: u32) -> [u8; AVI_HEADER_LEN] {
    let mut header = AVI_HEADER_TEMPLATE;
    let (width, height) = size.dimensions();

    let index_bytes = (CHUNK_HEADER_LEN + INDEX_ENTRY_LEN * frames as usize) as u32;
    let riff_size = (AVI_HEADER_LEN as u32 - 8)
        .wrapping_add(data_bytes)
        .wrapping_add(index_bytes);

    put_u32(&mut header, RIFF_SIZE_OFFSET, riff_size);
    put_u32(&mut header, USECS_PER_FRAME_OFFSET, frame_interval_us(fps));
    put_u32(&mut header, TOTAL_FRAMES_OFFSET, frames);
    put_u32(&mut header, STREAM_LENGTH_OFFSET, frames);
    put_u32(&mut header, FRAME_RATE_OFFSET, fps);
    put_u32(&mut header, AVIH_WIDTH_OFFSET, width);
    put_u32(&mut header, STRF_WIDTH_OFFSET, width);
    put_u32(&mut header, AVIH_HEIGHT_OFFSET, height);
    put_u32(&mut header, STRF_HEIGHT_OFFSET, height);
    put_u32(&mut header, MOVI_SIZE_OFFSET, 4u32.wrapping_add(data_bytes));

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn template_structure() {
        assert_eq!(&AVI_HEADER_TEMPLATE[0..4], b"RIFF");
        assert_eq!(&AVI_HEADER_TEMPLATE[8..12], b"AVI ");
        assert_eq!(&AVI_HEADER_TEMPLATE[12..16], b"LIST");
        assert_eq!(&AVI_HEADER_TEMPLATE[20..24], b"hdrl");
        // hdrl list spans exactly up to the movi list
        assert_eq!(20 + u32_at(&AVI_HEADER_TEMPLATE, 16) as usize, 298);
        assert_eq!(&AVI_HEADER_TEMPLATE[298..302], b"LIST");
        assert_eq!(&AVI_HEADER_TEMPLATE[306..310], b"movi");
        assert_eq!(MOVI_SIZE_OFFSET, 302);
    }

    #[test]
    fn padding_boundaries() {
        assert_eq!(chunk_padding(0), 0);
        assert_eq!(chunk_padding(4), 0);
        assert_eq!(chunk_padding(5), 3);
        assert_eq!(chunk_padding(6), 2);
        assert_eq!(chunk_padding(7), 1);
        assert_eq!(chunk_padding(1024), 0);
    }

    #[test]
    fn frame_interval_rounds() {
        assert_eq!(frame_interval_us(10), 100_000);
        assert_eq!(frame_interval_us(3), 333_333);
        assert_eq!(frame_interval_us(7), 142_857);
        assert_eq!(frame_interval_us(6), 166_667);
        assert_eq!(frame_interval_us(0), 0);
    }

    #[test]
    fn playback_delay_defaults_implausible_rates() {
        assert_eq!(playback_delay(20), Duration::from_millis(50));
        assert_eq!(playback_delay(60), Duration::from_millis(16));
        assert_eq!(playback_delay(0), Duration::from_millis(100));
        assert_eq!(playback_delay(61), Duration::from_millis(100));
        assert_eq!(playback_delay(255), Duration::from_millis(100));
    }

    #[test]
    fn build_header_patches_every_field() {
        let header = build_header(12, FrameSize::Svga, 30, 40_000);

        assert_eq!(u32_at(&header, 0x04), 302 + 40_000 + 8 + 16 * 30);
        assert_eq!(u32_at(&header, 0x20), 83_333);
        assert_eq!(u32_at(&header, 0x30), 30);
        assert_eq!(u32_at(&header, 0x8C), 30);
        assert_eq!(header[0x84], 12);
        assert_eq!(u32_at(&header, 0x40), 800);
        assert_eq!(u32_at(&header, 0xA8), 800);
        assert_eq!(u32_at(&header, 0x44), 600);
        assert_eq!(u32_at(&header, 0xAC), 600);
        assert_eq!(u32_at(&header, 0x12E), 40_004);
    }

    #[test]
    fn build_header_leaves_rest_of_template_alone() {
        let header = build_header(10, FrameSize::Vga, 0, 0);
        let patched = [
            0x04, 0x20, 0x30, 0x40, 0x44, 0x84, 0x8C, 0xA8, 0xAC, 0x12E,
        ];
        for (i, (a, b)) in header.iter().zip(AVI_HEADER_TEMPLATE.iter()).enumerate() {
            let in_patch = patched.iter().any(|&p| i >= p && i < p + 4);
            if !in_patch {
                assert_eq!(a, b, "byte {:#x} changed", i);
            }
        }
    }

    #[test]
    fn frame_size_tags() {
        assert_eq!(FrameSize::Svga.tag(), "SVGA");
        assert_eq!(FrameSize::from_tag("hd"), Some(FrameSize::Hd));
        assert_eq!("UXGA".parse::<FrameSize>().unwrap(), FrameSize::Uxga);
        assert!("8K".parse::<FrameSize>().is_err());
        assert_eq!(FrameSize::Vga.dimensions(), (640, 480));
        assert_eq!(FrameSize::Uxga.to_string(), "UXGA");
    }
}
