//! Periodic frame timer
//!
//! Ticks at the capture rate and only wakes the capture path. Missed ticks
//! collapse into one pending wake-up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::avi::frame_interval_us;

/// Handle to a running frame timer
#[derive(Clone)]
pub struct FrameTimer {
    notify: Arc<Notify>,
    period: Duration,
}

impl FrameTimer {
    /// Spawn a timer ticking `fps` times per second until `shutdown` fires
    pub fn start(fps: u32, shutdown: CancellationToken) -> Self {
        let period = Duration::from_micros(frame_interval_us(fps.max(1)) as u64);
        let notify = Arc::new(Notify::new());

        let tick_notify = notify.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => tick_notify.notify_one(),
                }
            }
        });

        Self { notify, period }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick
    pub async fn tick(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn period_from_fps() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let shutdown = CancellationToken::new();
            assert_eq!(
                FrameTimer::start(10, shutdown.clone()).period(),
                Duration::from_millis(100)
            );
            assert_eq!(
                FrameTimer::start(0, shutdown.clone()).period(),
                Duration::from_secs(1)
            );
            shutdown.cancel();
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticks_at_rate() {
        let shutdown = CancellationToken::new();
        let timer = FrameTimer::start(50, shutdown.clone());
        let start = Instant::now();
        for _ in 0..5 {
            timer.tick().await;
        }
        let elapsed = start.elapsed();
        // First tick is immediate, four more at 20ms
        assert!(elapsed >= Duration::from_millis(60), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}", elapsed);
        shutdown.cancel();
    }
}
