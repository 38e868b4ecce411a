//! Telemetry sample and its shared cell.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Most recent speed/RPM reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySample {
    /// Vehicle speed, never negative
    pub speed_kmh: f32,
    /// Engine/motor RPM
    pub rpm: u32,
    /// When the speed was last decoded; `None` until the first speed frame.
    /// RPM frames do not refresh it.
    pub observed_at: Option<DateTime<Utc>>,
}

impl TelemetrySample {
    /// Time since the last speed frame, `None` if none has arrived.
    ///
    /// A timestamp in the future (clock stepped backwards) counts as zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.observed_at
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Whether the speed reading is older than `max_age` or missing.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now).map_or(true, |age| age > max_age)
    }
}

/// Atomic-swap cell holding the latest [`TelemetrySample`].
///
/// Writers install whole new samples; readers copy out the current one
/// without locking. There is a single writer (the receive loop).
#[derive(Debug)]
pub struct TelemetryCell {
    sample: ArcSwap<TelemetrySample>,
}

impl Default for TelemetryCell {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCell {
    /// A cell holding a zeroed sample
    #[must_use]
    pub fn new() -> Self {
        Self {
            sample: ArcSwap::from_pointee(TelemetrySample::default()),
        }
    }

    /// Copy of the current sample
    #[must_use]
    pub fn load(&self) -> TelemetrySample {
        **self.sample.load()
    }

    /// Replaces speed and timestamp, keeping RPM.
    pub fn record_speed(&self, speed_kmh: f32, observed_at: DateTime<Utc>) {
        self.sample.rcu(|current| TelemetrySample {
            speed_kmh: speed_kmh.max(0.0),
            observed_at: Some(observed_at),
            ..**current
        });
    }

    /// Replaces RPM, keeping speed and timestamp.
    pub fn record_rpm(&self, rpm: u32) {
        self.sample.rcu(|current| TelemetrySample {
            rpm,
            ..**current
        });
    }
}
