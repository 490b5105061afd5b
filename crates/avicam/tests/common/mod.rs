#![allow(dead_code)]

use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use avicam::avi::{AviWriter, FrameSize};
use avicam::catalog::RecordingName;
use avicam::storage::Storage;
use avicam::{FrameBuffer, FrameSource};

/// JPEG-looking payload of exactly `len` bytes (min 6) tagged with `id`
pub fn jpeg(len: usize, id: u8) -> Vec<u8> {
    assert!(len >= 6);
    let mut data = vec![id; len];
    data[..2].copy_from_slice(&[0xFF, 0xD8]);
    data[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    data
}

/// Frame source that hands out numbered JPEG frames and counts releases
#[derive(Default)]
pub struct CountingSource {
    acquired: AtomicU32,
    released: AtomicU64,
}

impl CountingSource {
    pub fn outstanding(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst) as u64 - self.released.load(Ordering::SeqCst)
    }
}

impl FrameSource for CountingSource {
    fn acquire(&self) -> Option<FrameBuffer> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Some(FrameBuffer::jpeg(Bytes::from(jpeg(200 + (n as usize % 4), n as u8))))
    }

    fn release(&self, _frame: FrameBuffer) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn counting_source() -> Arc<CountingSource> {
    Arc::new(CountingSource::default())
}

/// Write a finished recording at its catalog path and return that path
pub fn write_recording(
    storage: &dyn Storage,
    stamp: &str,
    fps: u32,
    frames: &[Vec<u8>],
) -> std::path::PathBuf {
    let started_at = chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d_%H-%M-%S").unwrap();
    let name = RecordingName {
        started_at,
        size_tag: "SVGA".to_string(),
        fps,
        duration_secs: 10,
    };
    let path = storage.root().join(name.relative_path());
    storage.create_dir_all(path.parent().unwrap()).unwrap();
    write_avi(storage, &path, fps, frames);
    path
}

pub fn write_avi(storage: &dyn Storage, path: &Path, fps: u32, frames: &[Vec<u8>]) {
    let file = storage.create(path).unwrap();
    let mut writer = AviWriter::create(file, FrameSize::Svga, fps, 1024, 1000).unwrap();
    for frame in frames {
        writer.write_frame(frame).unwrap();
    }
    writer.finish(fps).unwrap();
}
