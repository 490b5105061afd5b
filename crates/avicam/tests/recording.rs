//! Recording worker against the real filesystem

mod common;

use std::sync::Arc;

use avicam::catalog::{RecordingCatalog, TEMP_FILE_NAME};
use avicam::recorder::{Recorder, RecorderConfig, RecordingControl};
use avicam::storage::{LocalStorage, Storage};
use avicam::{FrameSource, SharedFrame};
use common::{counting_source, CountingSource};

fn next_frame(source: &Arc<CountingSource>) -> SharedFrame {
    let raw = source.acquire().unwrap();
    SharedFrame::from_source(raw, source.clone())
}

fn setup(config: RecorderConfig) -> (tempfile::TempDir, Arc<LocalStorage>, RecordingControl, Recorder) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path()).unwrap());
    let control = RecordingControl::new(true);
    let recorder = Recorder::new(config, storage.clone(), control.clone()).unwrap();
    (dir, storage, control, recorder)
}

#[tokio::test(flavor = "multi_thread")]
async fn max_frames_auto_closes_and_renames() {
    let config = RecorderConfig {
        max_frames: 8,
        min_seconds: 0,
        write_buffer: 1024,
        ..Default::default()
    };
    let (dir, storage, control, mut recorder) = setup(config);
    let source = counting_source();

    for _ in 0..8 {
        recorder.handle_frame(next_frame(&source));
    }

    // Closed without any disarm
    assert!(control.is_armed());
    assert!(!recorder.is_recording());
    assert!(!dir.path().join(TEMP_FILE_NAME).exists());

    let catalog = RecordingCatalog::new(storage.clone());
    let recordings = catalog.list().unwrap();
    assert_eq!(recordings.len(), 1);
    let info = &recordings[0];
    assert_eq!(info.size_tag, "SVGA");
    assert!(info.path.starts_with(dir.path()));
    let day = info.path.parent().unwrap().file_name().unwrap().to_str().unwrap();
    assert!(info
        .path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with(day));

    let mut reader = avicam::avi::AviReader::open(storage.open(&info.path).unwrap()).unwrap();
    let mut count = 0;
    while reader.next_frame().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 8);

    // Every frame went back to the source
    assert_eq!(source.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn short_recording_leaves_no_file() {
    let config = RecorderConfig {
        max_frames: 100,
        min_seconds: 60,
        write_buffer: 1024,
        ..Default::default()
    };
    let (dir, storage, control, recorder) = setup(config);
    let source = counting_source();
    let stats = recorder.stats();

    let (tx, rx) = tokio::sync::mpsc::channel(10);
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(recorder.run(rx, cancel.clone()));

    for _ in 0..3 {
        tx.send(next_frame(&source)).await.unwrap();
    }
    while stats.snapshot().frames_written < 3 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(dir.path().join(TEMP_FILE_NAME).exists());

    control.disarm();
    while stats.snapshot().files_discarded < 1 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(!dir.path().join(TEMP_FILE_NAME).exists());
    assert!(RecordingCatalog::new(storage).list().unwrap().is_empty());

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(source.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_finalizes_open_file() {
    let config = RecorderConfig {
        max_frames: 100,
        min_seconds: 0,
        write_buffer: 1024,
        ..Default::default()
    };
    let (_dir, storage, _control, recorder) = setup(config);
    let source = counting_source();
    let stats = recorder.stats();

    let (tx, rx) = tokio::sync::mpsc::channel(10);
    let cancel = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(recorder.run(rx, cancel.clone()));
    for _ in 0..4 {
        tx.send(next_frame(&source)).await.unwrap();
    }
    while stats.snapshot().frames_written < 4 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    cancel.cancel();
    task.await.unwrap();

    let recordings = RecordingCatalog::new(storage).list().unwrap();
    assert_eq!(recordings.len(), 1);
    assert_eq!(stats.snapshot().files_kept, 1);
}
