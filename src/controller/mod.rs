//! # Controller Module
//!
//! Gamepad input handling.
//!
//! This module handles:
//! - Gamepad detection and connection via evdev
//! - Folding button and stick events into a [`GamepadState`]
//! - Optional deadzone and expo calibration
//!
//! The control loop only sees the [`InputDevice`] trait, so tests and bench
//! setups can substitute scripted input.

pub mod calibration;
pub mod gamepad;
pub mod mapper;

pub use calibration::{AxisRange, Calibration};
pub use gamepad::{EvdevGamepad, GamepadFeed};
pub use mapper::EventMapper;

use crate::error::Result;
use crate::vehicle::GearButtons;

/// Snapshot of the gamepad.
///
/// Sticks are normalized to -1.0..=1.0 with 0.0 at rest; Y axes read
/// positive when pushed up.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadState {
    pub left_stick_x: f32,
    pub left_stick_y: f32,
    pub right_stick_x: f32,
    pub right_stick_y: f32,
    /// A, selects Drive
    pub btn_a: bool,
    /// B, selects Park
    pub btn_b: bool,
    /// X, selects Neutral
    pub btn_x: bool,
    /// Y, selects Reverse
    pub btn_y: bool,
}

impl GamepadState {
    /// Raw throttle demand (right stick Y)
    #[must_use]
    pub fn throttle_axis(&self) -> f32 {
        self.right_stick_y
    }

    /// Raw steering demand (left stick X), before inversion
    #[must_use]
    pub fn steering_axis(&self) -> f32 {
        self.left_stick_x
    }

    /// Current levels of the gear buttons
    #[must_use]
    pub fn gear_buttons(&self) -> GearButtons {
        GearButtons {
            drive: self.btn_a,
            park: self.btn_b,
            neutral: self.btn_x,
            reverse: self.btn_y,
        }
    }
}

/// Source of gamepad snapshots for the control loop.
pub trait InputDevice: Send {
    /// Latest complete state. Must not block.
    ///
    /// # Errors
    ///
    /// `InputRead` when the device is gone or unreadable.
    fn read(&mut self) -> Result<GamepadState>;
}
