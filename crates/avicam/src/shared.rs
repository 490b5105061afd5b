//! Shared ownership of captured frames
//!
//! One physical frame can be in flight to the stream sink, the recorder and
//! the event path at once. [`SharedFrame`] counts the references and hands
//! the buffer back to its [`FrameSource`] when the last one is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;

use crate::{FrameBuffer, FrameSource};

struct Inner {
    frame: FrameBuffer,
    source: Option<Arc<dyn FrameSource>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            let frame = std::mem::replace(&mut self.frame, FrameBuffer::jpeg(Bytes::new()));
            source.release(frame);
        }
    }
}

/// Reference-counted handle to one frame.
///
/// Cloning (or [`share`](SharedFrame::share)) adds a reference; dropping
/// (or [`release`](SharedFrame::release)) removes one. The source release
/// runs exactly once, on the transition to zero.
pub struct SharedFrame(Arc<Inner>);

impl SharedFrame {
    /// Wrap a frame acquired from `source`
    pub fn from_source(frame: FrameBuffer, source: Arc<dyn FrameSource>) -> Self {
        Self(Arc::new(Inner {
            frame,
            source: Some(source),
        }))
    }

    /// Wrap a frame that has no source to return to (e.g. read from a file)
    pub fn owned(frame: FrameBuffer) -> Self {
        Self(Arc::new(Inner {
            frame,
            source: None,
        }))
    }

    /// Hand out another reference to the same frame
    pub fn share(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    /// Give up this reference
    pub fn release(self) {
        drop(self);
    }

    /// Number of live references
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.0.frame
    }
}

impl Clone for SharedFrame {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl Deref for SharedFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.0.frame
    }
}

impl fmt::Debug for SharedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFrame")
            .field("len", &self.0.frame.len())
            .field("format", &self.0.frame.format)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TestSource, TestSourceConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source() -> Arc<TestSource> {
        Arc::new(TestSource::new(TestSourceConfig {
            frame_size: 32,
            ..Default::default()
        }))
    }

    #[test]
    fn release_on_last_reference() {
        let src = source();
        let frame = src.acquire().unwrap();
        let shared = SharedFrame::from_source(frame, src.clone());
        let a = shared.share();
        let b = shared.clone();
        assert_eq!(shared.ref_count(), 3);

        a.release();
        shared.release();
        assert_eq!(src.outstanding(), 1);
        assert_eq!(b.ref_count(), 1);

        b.release();
        assert_eq!(src.outstanding(), 0);
        assert_eq!(src.released(), 1);
    }

    #[test]
    fn released_buffer_is_the_original() {
        struct Capture {
            seen: std::sync::Mutex<Vec<Bytes>>,
        }
        impl FrameSource for Capture {
            fn acquire(&self) -> Option<FrameBuffer> {
                None
            }
            fn release(&self, frame: FrameBuffer) {
                self.seen.lock().unwrap().push(frame.payload);
            }
        }

        let capture = Arc::new(Capture {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let payload = Bytes::from_static(&[0xFF, 0xD8, 1, 2]);
        let shared = SharedFrame::from_source(FrameBuffer::jpeg(payload.clone()), capture.clone());
        assert_eq!(shared.payload, payload);
        drop(shared);

        let seen = capture.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], payload);
    }

    #[test]
    fn owned_frames_release_nothing() {
        let shared = SharedFrame::owned(FrameBuffer::jpeg(Bytes::from_static(&[0xFF, 0xD8])));
        let other = shared.share();
        assert_eq!(other.len(), 2);
        drop(shared);
        drop(other);
    }

    #[test]
    fn concurrent_share_and_release() {
        struct Counting(AtomicUsize);
        impl FrameSource for Counting {
            fn acquire(&self) -> Option<FrameBuffer> {
                None
            }
            fn release(&self, _frame: FrameBuffer) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        for _ in 0..50 {
            let shared = SharedFrame::from_source(
                FrameBuffer::jpeg(Bytes::from_static(&[0xFF, 0xD8, 0, 0])),
                counting.clone(),
            );
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let handle = shared.share();
                    std::thread::spawn(move || {
                        let again = handle.share();
                        assert!(again.ref_count() >= 2);
                        again.release();
                        handle.release();
                    })
                })
                .collect();
            shared.release();
            for h in handles {
                h.join().unwrap();
            }
        }
        assert_eq!(counting.0.load(Ordering::SeqCst), 50);
    }
}
