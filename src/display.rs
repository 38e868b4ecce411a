//! # Display Module
//!
//! Instrument-cluster output. The control loop pushes a [`DisplaySnapshot`]
//! at most twice a second; how it is rendered is up to the [`Display`]
//! implementation.

use std::io::{self, Stdout, Write};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::vehicle::GearState;

/// Fastest refresh the cluster is driven at (2 Hz).
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// What the cluster shows.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplaySnapshot {
    pub speed_kmh: f32,
    pub gear: GearState,
    /// CAN link up
    pub connected: bool,
    /// Speed reading older than the configured limit, or never received
    pub stale: bool,
}

impl DisplaySnapshot {
    /// One-line rendering, e.g. `Speed:   42.5 km/h | Gear: D | CAN: OK`
    #[must_use]
    pub fn render_line(&self) -> String {
        let speed = if self.stale {
            "  --.-".to_string()
        } else {
            format!("{:6.1}", self.speed_kmh)
        };
        format!(
            "Speed: {} km/h | Gear: {} | CAN: {}",
            speed,
            self.gear,
            if self.connected { "OK" } else { "OFF" }
        )
    }
}

/// Cluster display collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait Display: Send {
    /// Shown once before the control loop starts
    fn show_startup(&mut self);

    /// Latest speed, gear and link state
    fn update(&mut self, snapshot: &DisplaySnapshot);

    /// Shown when startup or the loop fails
    fn show_error(&mut self, message: &str);
}

/// Rate limiter for display updates.
#[derive(Debug, Clone)]
pub struct RefreshGate {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        Self::new(MIN_REFRESH_INTERVAL)
    }
}

impl RefreshGate {
    /// Gate opening at most once per `interval`, never faster than 2 Hz.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_REFRESH_INTERVAL),
            last: None,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` (and arms the gate) if a refresh is due at `now`.
    /// The first call always passes.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Text cluster for a terminal, one line per refresh.
#[derive(Debug)]
pub struct ConsoleDisplay<W: Write + Send = Stdout> {
    out: W,
}

impl ConsoleDisplay<Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|()| self.out.flush()) {
            warn!("Display write failed: {}", e);
        }
    }
}

impl<W: Write + Send> Display for ConsoleDisplay<W> {
    fn show_startup(&mut self) {
        self.write_line(&format!("PiRacer cluster v{}", env!("CARGO_PKG_VERSION")));
    }

    fn update(&mut self, snapshot: &DisplaySnapshot) {
        self.write_line(&snapshot.render_line());
    }

    fn show_error(&mut self, message: &str) {
        self.write_line(&format!("ERROR: {}", message));
    }
}
