use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Supplies the time elapsed between consecutive display frames.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Duration> + Send + '_>>;
}

/// Frames from a tokio interval. Reports measured elapsed time, so a late
/// frame advances animations by the real delay.
///
/// Must be created inside a tokio runtime.
pub struct IntervalFrames {
    interval: Interval,
    last: Instant,
}

impl IntervalFrames {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            last: Instant::now(),
        }
    }
}

impl FrameSource for IntervalFrames {
    fn next_frame(&mut self) -> Pin<Box<dyn Future<Output = Duration> + Send + '_>> {
        Box::pin(async move {
            let now = self.interval.tick().await;
            let elapsed = now.saturating_duration_since(self.last);
            self.last = now;
            elapsed
        })
    }
}
