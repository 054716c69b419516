use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};

/// Fixed-cadence cycle timer.
///
/// The first tick completes immediately. A cycle that overruns the period
/// pushes the following ticks back instead of firing a burst.
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Wait for the next cycle start
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
