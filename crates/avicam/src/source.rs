//! Frame source adapter
//!
//! The camera driver is an external collaborator: the pipeline only ever
//! asks it for the next frame and hands frames back when every consumer is
//! done with them. A synthetic source is available behind the `test-source`
//! feature for development without camera hardware.

use crate::FrameBuffer;

/// Camera driver interface consumed by the distribution hub.
pub trait FrameSource: Send + Sync {
    /// Acquire the next captured frame, or `None` if none is available.
    fn acquire(&self) -> Option<FrameBuffer>;

    /// Return a frame obtained from [`FrameSource::acquire`].
    ///
    /// Called exactly once per acquired frame, by the ownership wrapper
    /// when its last reference goes away.
    fn release(&self, frame: FrameBuffer);
}

#[cfg(any(test, feature = "test-source"))]
pub use test_source::{TestSource, TestSourceConfig};

#[cfg(any(test, feature = "test-source"))]
mod test_source {
    use super::FrameSource;
    use crate::FrameBuffer;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
    use std::time::Instant;
    use tracing::debug;

    /// Configuration for the synthetic frame source
    #[derive(Debug, Clone)]
    pub struct TestSourceConfig {
        /// Simulated JPEG size in bytes (at least 16)
        pub frame_size: usize,
        /// Reported frame width
        pub width: u32,
        /// Reported frame height
        pub height: u32,
    }

    impl Default for TestSourceConfig {
        fn default() -> Self {
            Self {
                frame_size: 10_000, // ~10KB per frame
                width: 800,
                height: 600,
            }
        }
    }

    /// Synthetic source producing JPEG-shaped frames.
    ///
    /// Keeps count of frames handed out and returned so tests can check
    /// that every acquired buffer comes back exactly once.
    pub struct TestSource {
        config: TestSourceConfig,
        frame_num: AtomicU32,
        outstanding: AtomicUsize,
        released: AtomicU64,
        start: Instant,
    }

    impl TestSource {
        pub fn new(config: TestSourceConfig) -> Self {
            Self {
                config,
                frame_num: AtomicU32::new(0),
                outstanding: AtomicUsize::new(0),
                released: AtomicU64::new(0),
                start: Instant::now(),
            }
        }

        /// Frames acquired but not yet released
        pub fn outstanding(&self) -> usize {
            self.outstanding.load(Ordering::SeqCst)
        }

        /// Total frames released back to the source
        pub fn released(&self) -> u64 {
            self.released.load(Ordering::SeqCst)
        }

        /// Total frames handed out
        pub fn acquired(&self) -> u32 {
            self.frame_num.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for TestSource {
        fn acquire(&self) -> Option<FrameBuffer> {
            let frame_num = self.frame_num.fetch_add(1, Ordering::SeqCst);
            let timestamp_us = self.start.elapsed().as_micros() as u64;
            let size = self.config.frame_size.max(16);

            let mut data = Vec::with_capacity(size);
            // SOI marker, then a small header so frames are distinguishable
            data.extend_from_slice(&[0xFF, 0xD8]);
            data.extend_from_slice(&frame_num.to_be_bytes());
            data.extend_from_slice(&timestamp_us.to_be_bytes());
            while data.len() < size - 2 {
                data.push((frame_num & 0xFF) as u8);
            }
            // EOI marker
            data.extend_from_slice(&[0xFF, 0xD9]);

            self.outstanding.fetch_add(1, Ordering::SeqCst);
            if frame_num % 300 == 0 {
                debug!("Test source: {} frames generated", frame_num);
            }

            Some(
                FrameBuffer::jpeg(Bytes::from(data))
                    .with_dimensions(self.config.width, self.config.height)
                    .with_timestamp(timestamp_us),
            )
        }

        fn release(&self, _frame: FrameBuffer) {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_source_frames_are_valid_jpeg() {
            let source = TestSource::new(TestSourceConfig {
                frame_size: 64,
                ..Default::default()
            });
            let frame = source.acquire().unwrap();
            assert_eq!(frame.len(), 64);
            assert!(frame.check_jpeg().is_ok());
            assert_eq!(&frame.payload[62..], &[0xFF, 0xD9]);
            assert_eq!((frame.width, frame.height), (800, 600));
        }

        #[test]
        fn test_source_tracks_outstanding_frames() {
            let source = TestSource::new(TestSourceConfig::default());
            let a = source.acquire().unwrap();
            let b = source.acquire().unwrap();
            assert_eq!(source.outstanding(), 2);
            assert_eq!(source.acquired(), 2);

            source.release(a);
            assert_eq!(source.outstanding(), 1);
            source.release(b);
            assert_eq!(source.outstanding(), 0);
            assert_eq!(source.released(), 2);
        }

        #[test]
        fn test_source_frames_differ() {
            let source = TestSource::new(TestSourceConfig::default());
            let a = source.acquire().unwrap();
            let b = source.acquire().unwrap();
            assert_ne!(a.payload[2..6], b.payload[2..6]);
        }
    }
}
