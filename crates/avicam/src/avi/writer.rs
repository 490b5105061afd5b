//! Incremental AVI writer
//!
//! Frames are packed into a fixed-size in-memory buffer that is flushed to
//! the output whenever the next chunk would not fit, or whenever it fills
//! exactly while a chunk is being copied. The header is written as a
//! placeholder on creation and rewritten with final values by
//! [`AviWriter::finish`].

use anyhow::{bail, Context, Result};
use std::io::{Seek, SeekFrom, Write};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    build_header, chunk_padding, FrameSize, AVI_HEADER_LEN, CHUNK_HEADER_LEN, INDEX_ENTRY_LEN,
    INDEX_TAG, VIDEO_CHUNK_TAG,
};

/// Running `idx1` index, built in memory and written at close
#[derive(Debug)]
pub struct AviIndex {
    buf: Vec<u8>,
    next_offset: u32,
    entries: u32,
}

impl AviIndex {
    /// Allocate an index able to hold `max_frames` entries without growing
    pub fn with_capacity(max_frames: u32) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(CHUNK_HEADER_LEN + INDEX_ENTRY_LEN * max_frames as usize)
            .context("Failed to allocate index buffer")?;
        buf.extend_from_slice(&INDEX_TAG);
        buf.extend_from_slice(&[0u8; 4]);
        Ok(Self {
            buf,
            // Offsets count from the `movi` type tag
            next_offset: 4,
            entries: 0,
        })
    }

    /// Append an entry for a chunk whose padded payload is `padded_len` bytes
    pub fn push(&mut self, padded_len: u32) {
        self.buf.extend_from_slice(&VIDEO_CHUNK_TAG);
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.buf.extend_from_slice(&self.next_offset.to_le_bytes());
        self.buf.extend_from_slice(&padded_len.to_le_bytes());
        self.next_offset = self
            .next_offset
            .wrapping_add(padded_len)
            .wrapping_add(CHUNK_HEADER_LEN as u32);
        self.entries += 1;
    }

    /// Number of entries
    pub fn len(&self) -> u32 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// (offset, length) of entry `i`
    pub fn entry(&self, i: u32) -> Option<(u32, u32)> {
        if i >= self.entries {
            return None;
        }
        let base = CHUNK_HEADER_LEN + INDEX_ENTRY_LEN * i as usize;
        let read = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&self.buf[at..at + 4]);
            u32::from_le_bytes(word)
        };
        Some((read(base + 8), read(base + 12)))
    }

    /// Patch the index size field and return the complete chunk
    pub fn finalize(&mut self) -> &[u8] {
        let size = (INDEX_ENTRY_LEN as u32) * self.entries;
        self.buf[4..8].copy_from_slice(&size.to_le_bytes());
        &self.buf
    }
}

/// Totals reported when a file is finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AviSummary {
    /// Frames written
    pub frames: u32,
    /// Frame rate stored in the header
    pub fps: u32,
    /// Bytes of frame chunks in the data section
    pub data_bytes: u64,
    /// Final file length
    pub file_len: u64,
    /// Time spent in output writes
    pub write_time: Duration,
}

/// Writes one MJPEG AVI file
pub struct AviWriter<W: Write + Seek> {
    out: W,
    buffer: Vec<u8>,
    capacity: usize,
    index: AviIndex,
    frame_size: FrameSize,
    max_frames: u32,
    frames: u32,
    data_bytes: u64,
    write_time: Duration,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Start a new file on `out`: allocate the write buffer and index, then
    /// write a placeholder header.
    pub fn create(
        out: W,
        frame_size: FrameSize,
        nominal_fps: u32,
        buffer_size: usize,
        max_frames: u32,
    ) -> Result<Self> {
        Self::with_buffer(out, Vec::new(), frame_size, nominal_fps, buffer_size, max_frames)
    }

    /// Like [`AviWriter::create`], reusing `buffer` as the write buffer
    pub fn with_buffer(
        mut out: W,
        mut buffer: Vec<u8>,
        frame_size: FrameSize,
        nominal_fps: u32,
        buffer_size: usize,
        max_frames: u32,
    ) -> Result<Self> {
        let capacity = buffer_size.max(CHUNK_HEADER_LEN);
        buffer.clear();
        if buffer.capacity() < capacity {
            buffer
                .try_reserve_exact(capacity)
                .context("Failed to allocate write buffer")?;
        }
        let index = AviIndex::with_capacity(max_frames)?;

        let header = build_header(nominal_fps, frame_size, 0, 0);
        out.write_all(&header).context("Failed to write AVI header")?;

        Ok(Self {
            out,
            buffer,
            capacity,
            index,
            frame_size,
            max_frames,
            frames: 0,
            data_bytes: 0,
            write_time: Duration::ZERO,
        })
    }

    /// Frames written so far
    pub fn frame_count(&self) -> u32 {
        self.frames
    }

    /// True once the frame cap has been reached
    pub fn is_full(&self) -> bool {
        self.frames >= self.max_frames
    }

    /// Bytes currently held in the write buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn index(&self) -> &AviIndex {
        &self.index
    }

    /// Append one JPEG frame as a `00dc` chunk
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if self.is_full() {
            bail!("Frame cap of {} reached", self.max_frames);
        }
        let padding = chunk_padding(payload.len());
        let padded = payload.len() + padding;
        let total = CHUNK_HEADER_LEN + padded;
        if self.data_bytes + total as u64 > u32::MAX as u64 {
            bail!("Recording exceeds AVI size limit");
        }

        // Never split a chunk across a flush that could have been avoided
        if self.buffer.len() + total > self.capacity && !self.buffer.is_empty() {
            self.flush_buffer()?;
        }

        let mut chunk_header = [0u8; CHUNK_HEADER_LEN];
        chunk_header[..4].copy_from_slice(&VIDEO_CHUNK_TAG);
        chunk_header[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        self.push_bytes(&chunk_header)?;
        self.push_bytes(payload)?;
        self.push_bytes(&[0u8; 3][..padding])?;

        self.index.push(padded as u32);
        self.data_bytes += total as u64;
        self.frames += 1;
        debug!(
            frame = self.frames,
            len = payload.len(),
            buffered = self.buffer.len(),
            "Frame buffered"
        );
        Ok(())
    }

    fn push_bytes(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let space = self.capacity - self.buffer.len();
            let n = space.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            if self.buffer.len() == self.capacity {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        self.out
            .write_all(&self.buffer)
            .with_context(|| format!("Failed to write {} buffered bytes", self.buffer.len()))?;
        self.write_time += start.elapsed();
        self.buffer.clear();
        Ok(())
    }

    /// Flush remaining data, append the index, and rewrite the header with
    /// the final frame count and `fps`. Returns the output and a summary.
    pub fn finish(self, fps: u32) -> Result<(W, AviSummary)> {
        let (out, summary, _buffer) = self.finish_reusing(fps)?;
        Ok((out, summary))
    }

    /// Like [`AviWriter::finish`], also handing back the emptied write buffer
    pub fn finish_reusing(mut self, fps: u32) -> Result<(W, AviSummary, Vec<u8>)> {
        self.flush_buffer()?;

        let start = Instant::now();
        let index = self.index.finalize();
        self.out
            .write_all(index)
            .context("Failed to write AVI index")?;

        let header = build_header(fps, self.frame_size, self.frames, self.data_bytes as u32);
        self.out
            .seek(SeekFrom::Start(0))
            .context("Failed to seek to AVI header")?;
        self.out
            .write_all(&header)
            .context("Failed to rewrite AVI header")?;
        self.out.flush()?;
        self.write_time += start.elapsed();

        let summary = AviSummary {
            frames: self.frames,
            fps,
            data_bytes: self.data_bytes,
            file_len: AVI_HEADER_LEN as u64
                + self.data_bytes
                + (CHUNK_HEADER_LEN + INDEX_ENTRY_LEN * self.frames as usize) as u64,
            write_time: self.write_time,
        };
        Ok((self.out, summary, self.buffer))
    }
}
