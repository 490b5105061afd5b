//! Playback sequencing over recordings on disk

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use avicam::catalog::RecordingCatalog;
use avicam::playback::{PlaybackControl, PlaybackEngine};
use avicam::storage::{LocalStorage, Storage};
use avicam::SharedFrame;
use common::{jpeg, write_recording};

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<LocalStorage>,
    control: PlaybackControl,
    rx: mpsc::Receiver<SharedFrame>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn new(setup: impl FnOnce(&LocalStorage)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).unwrap());
        setup(&storage);

        let control = PlaybackControl::new();
        let (tx, rx) = mpsc::channel(2);
        let shutdown = CancellationToken::new();
        let engine = PlaybackEngine::new(
            RecordingCatalog::new(storage.clone()),
            control.clone(),
            tx,
            Duration::from_millis(200),
        );
        let task = tokio::spawn(engine.run(shutdown.clone()));
        Self {
            _dir: dir,
            storage,
            control,
            rx,
            shutdown,
            task,
        }
    }

    async fn next_id(&mut self) -> u8 {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("no frame within 5s")
            .unwrap();
        frame.payload[2]
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn plays_files_in_chronological_order() {
    let mut h = Harness::new(|storage| {
        // Written out of order on purpose
        write_recording(storage, "2024-01-01_10-00-00", 50, &[jpeg(120, 2)]);
        write_recording(storage, "2024-01-01_09-00-00", 50, &[jpeg(120, 1)]);
        write_recording(storage, "2024-01-02_08-00-00", 50, &[jpeg(120, 3)]);
    });

    assert!(h.control.start(None));
    assert_eq!(h.next_id().await, 1);
    assert_eq!(h.next_id().await, 2);
    assert_eq!(h.next_id().await, 3);

    // Sequence ends after the last file
    for _ in 0..200 {
        if !h.control.is_active() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.control.is_active());
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_start_file_falls_back_to_earliest() {
    let mut h = Harness::new(|storage| {
        write_recording(storage, "2024-03-05_12-00-00", 50, &[jpeg(100, 7)]);
        write_recording(storage, "2024-03-04_12-00-00", 50, &[jpeg(100, 6)]);
    });

    let missing = h.storage.root().join("2024-03-04/does_not_exist.avi");
    assert!(h.control.start(Some(missing)));
    assert_eq!(h.next_id().await, 6);
    assert_eq!(h.next_id().await, 7);
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_start_file_skips_earlier_recordings() {
    let mut start = PathBuf::new();
    let mut h = Harness::new(|storage| {
        write_recording(storage, "2024-03-04_12-00-00", 50, &[jpeg(100, 6)]);
        start = write_recording(storage, "2024-03-05_12-00-00", 50, &[jpeg(100, 7)]);
    });

    assert!(h.control.start(Some(start)));
    assert_eq!(h.next_id().await, 7);
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_interrupts_replay() {
    let mut h = Harness::new(|storage| {
        // 1 fps: a second per frame, so stop lands mid-file
        let frames: Vec<Vec<u8>> = (0..30).map(|i| jpeg(100, i)).collect();
        write_recording(storage, "2024-05-01_08-00-00", 1, &frames);
    });

    assert!(!h.control.stop());
    assert!(!h.control.is_active());

    assert!(h.control.start(None));
    assert!(!h.control.start(None));
    assert_eq!(h.next_id().await, 0);

    assert!(h.control.stop());
    assert!(!h.control.is_active());
    assert!(!h.control.stop());
    assert!(!h.control.is_active());

    // At most one frame that was already in flight
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let mut late = 0;
    while h.rx.try_recv().is_ok() {
        late += 1;
    }
    assert!(late <= 1, "{} frames after stop", late);
    h.stop().await;
}
