//! Motor and steering actuator interface.

use tracing::{debug, trace};

/// Throttle/steering sink. Commands are fire-and-forget.
#[cfg_attr(test, mockall::automock)]
pub trait Actuator: Send {
    /// Throttle in [-1, 1], negative is reverse
    fn set_throttle(&mut self, percent: f32);

    /// Steering in [-1, 1]
    fn set_steering(&mut self, percent: f32);

    /// Zero both channels
    fn stop(&mut self) {
        self.set_throttle(0.0);
        self.set_steering(0.0);
    }
}

/// Dry-run actuator that logs commands instead of driving hardware.
///
/// Logs every command at `trace` and changes of more than 1% at `debug`.
#[derive(Debug, Default)]
pub struct TracingActuator {
    throttle: f32,
    steering: f32,
}

impl TracingActuator {
    const CHANGE_THRESHOLD: f32 = 0.01;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last throttle command
    #[must_use]
    pub fn throttle(&self) -> f32 {
        self.throttle
    }

    /// Last steering command
    #[must_use]
    pub fn steering(&self) -> f32 {
        self.steering
    }
}

impl Actuator for TracingActuator {
    fn set_throttle(&mut self, percent: f32) {
        trace!("throttle <- {:.3}", percent);
        if (percent - self.throttle).abs() > Self::CHANGE_THRESHOLD {
            debug!("Throttle {:.2} -> {:.2}", self.throttle, percent);
        }
        self.throttle = percent;
    }

    fn set_steering(&mut self, percent: f32) {
        trace!("steering <- {:.3}", percent);
        if (percent - self.steering).abs() > Self::CHANGE_THRESHOLD {
            debug!("Steering {:.2} -> {:.2}", self.steering, percent);
        }
        self.steering = percent;
    }
}
