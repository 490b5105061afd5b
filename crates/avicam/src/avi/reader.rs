//! AVI reader for playback
//!
//! Walks the RIFF structure to find the `movi` list, then yields `00dc`
//! frame payloads in file order. Everything else inside the data section
//! is skipped by its declared length.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;
use tracing::debug;

use super::{
    chunk_padding, playback_delay, AVI_HEADER_LEN, CHUNK_HEADER_LEN, FRAME_RATE_OFFSET, LIST_TAG, MOVI_TAG,
    RIFF_TAG, VIDEO_CHUNK_TAG,
};
use crate::frame::MAX_JPEG_SIZE;

/// Frame iterator over one AVI file
pub struct AviReader<R: Read + Seek> {
    src: R,
    fps: u8,
    cursor: u64,
    data_start: u64,
    data_end: Option<u64>,
}

fn align_even(pos: u64) -> u64 {
    pos + (pos & 1)
}

/// Read a (tag, size) pair at `at`; `None` at end of file
fn read_chunk_header<R: Read + Seek>(src: &mut R, at: u64) -> Result<Option<([u8; 4], u32)>> {
    src.seek(SeekFrom::Start(at))
        .with_context(|| format!("Failed to seek to offset {}", at))?;
    let mut buf = [0u8; CHUNK_HEADER_LEN];
    match src.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read chunk header"),
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&buf[..4]);
    let mut size = [0u8; 4];
    size.copy_from_slice(&buf[4..]);
    Ok(Some((tag, u32::from_le_bytes(size))))
}

/// Fill as much of `buf` as the source has; returns bytes read
fn read_up_to<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read + Seek> AviReader<R> {
    /// Parse the header region and locate the data section
    pub fn open(mut src: R) -> Result<Self> {
        let mut header = [0u8; AVI_HEADER_LEN];
        let n = read_up_to(&mut src, &mut header).context("Failed to read AVI header")?;
        if n < 12 || header[..4] != RIFF_TAG || &header[8..12] != b"AVI " {
            bail!("Not an AVI file");
        }
        let fps = if n > FRAME_RATE_OFFSET {
            header[FRAME_RATE_OFFSET]
        } else {
            0
        };
        let file_len = src
            .seek(SeekFrom::End(0))
            .context("Failed to seek to end of file")?;

        // Walk top-level chunks after the RIFF preamble
        let mut pos = 12u64;
        loop {
            let (tag, size) = match read_chunk_header(&mut src, pos)? {
                Some(h) => h,
                None => bail!("No movi list found"),
            };
            if tag == LIST_TAG {
                let mut list_type = [0u8; 4];
                src.read_exact(&mut list_type)
                    .context("Truncated LIST header")?;
                if list_type == MOVI_TAG {
                    let data_start = pos + 12;
                    let declared_end = pos + 8 + size as u64;
                    // Zero or out-of-range sizes come from unfinished files
                    let data_end = if size >= 4 && declared_end <= file_len {
                        Some(declared_end)
                    } else {
                        None
                    };
                    debug!(data_start, ?data_end, fps, "Found movi list");
                    return Ok(Self {
                        src,
                        fps,
                        cursor: data_start,
                        data_start,
                        data_end,
                    });
                }
            }
            pos = align_even(pos + CHUNK_HEADER_LEN as u64 + size as u64);
        }
    }

    /// Frame rate byte stored in the header
    pub fn fps(&self) -> u8 {
        self.fps
    }

    /// Delay between frames during playback
    pub fn frame_delay(&self) -> Duration {
        playback_delay(self.fps)
    }

    /// Byte range of the data section; open-ended for unfinished files
    pub fn data_range(&self) -> (u64, Option<u64>) {
        (self.data_start, self.data_end)
    }

    /// Offset of the chunk after a payload of `size` bytes starting at `payload_at`.
    ///
    /// Chunks are word aligned, but files from this writer pad to four bytes;
    /// the extra bytes are taken as padding only when they are all zero, since
    /// a chunk tag never starts with a zero byte.
    fn chunk_end(&mut self, payload_at: u64, size: u32) -> Result<u64> {
        let payload_end = payload_at + size as u64;
        let even = align_even(payload_end);
        let quad = payload_end + chunk_padding(size as usize) as u64;
        if quad <= even {
            return Ok(even);
        }
        self.src
            .seek(SeekFrom::Start(even))
            .with_context(|| format!("Failed to seek to offset {}", even))?;
        let mut pad = [0u8; 3];
        let want = (quad - even) as usize;
        let got = read_up_to(&mut self.src, &mut pad[..want]).context("Failed to read padding")?;
        if got == want && pad[..want].iter().all(|&b| b == 0) {
            Ok(quad)
        } else {
            Ok(even)
        }
    }

    /// Read the next video frame, or `None` at the end of the data section
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(end) = self.data_end {
                if self.cursor + CHUNK_HEADER_LEN as u64 > end {
                    return Ok(None);
                }
            }
            let (tag, size) = match read_chunk_header(&mut self.src, self.cursor)? {
                Some(h) => h,
                None => return Ok(None),
            };
            let payload_at = self.cursor + CHUNK_HEADER_LEN as u64;

            if tag != VIDEO_CHUNK_TAG {
                self.cursor = self.chunk_end(payload_at, size)?;
                continue;
            }

            let len = size as usize;
            if len == 0 || len > MAX_JPEG_SIZE {
                bail!("Implausible frame length {} at offset {}", len, self.cursor);
            }
            let mut data = Vec::new();
            data.try_reserve_exact(len)
                .context("Failed to allocate frame buffer")?;
            data.resize(len, 0);
            self.src
                .read_exact(&mut data)
                .with_context(|| format!("Truncated frame at offset {}", self.cursor))?;
            self.cursor = self.chunk_end(payload_at, size)?;
            return Ok(Some(Bytes::from(data)));
        }
    }
}
