//! # Gamepad Event Mapper
//!
//! Folds raw evdev events into a normalized [`GamepadState`].
//!
//! ## Axis Codes (EV_ABS)
//!
//! | Axis | evdev Code | Use |
//! |------|------------|-----|
//! | Left Stick X | ABS_X | Steering |
//! | Left Stick Y | ABS_Y | Unused |
//! | Right Stick X | ABS_Z | Unused |
//! | Right Stick Y | ABS_RZ | Throttle |
//!
//! Y axes are inverted so that pushing a stick up reads positive.
//!
//! ## Button Codes (EV_KEY)
//!
//! | Button | evdev Code | Gear |
//! |--------|------------|------|
//! | A | BTN_SOUTH | Drive |
//! | B | BTN_EAST | Park |
//! | X | BTN_NORTH | Neutral |
//! | Y | BTN_WEST | Reverse |
//!
//! Events arrive in bursts terminated by `SYN_REPORT`;
//! [`EventMapper::process_event`] returns `true` at the end of each burst so
//! callers publish only complete states.

use evdev::{AbsoluteAxisType, InputEvent, InputEventKind, Key, Synchronization};

use super::calibration::{AxisRange, Calibration};
use super::GamepadState;

/// Parses raw evdev events and maintains the current gamepad state.
///
/// Not thread-safe; owned by the single task reading the device.
#[derive(Debug, Default)]
pub struct EventMapper {
    state: GamepadState,
    range: AxisRange,
    calibration: Calibration,
}

impl EventMapper {
    /// Mapper for a 0-255 pad with linear calibration.
    ///
    /// ```
    /// use piracer_cluster::controller::mapper::EventMapper;
    ///
    /// let mapper = EventMapper::new();
    /// assert_eq!(mapper.state().throttle_axis(), 0.0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_calibration(range: AxisRange, calibration: Calibration) -> Self {
        Self {
            state: GamepadState::default(),
            range,
            calibration,
        }
    }

    /// Copy of the current state
    #[must_use]
    pub fn state(&self) -> GamepadState {
        self.state
    }

    /// Applies one event. Returns `true` on `SYN_REPORT`, meaning the state
    /// now reflects a complete report from the device.
    pub fn process_event(&mut self, event: &InputEvent) -> bool {
        match event.kind() {
            InputEventKind::AbsAxis(axis) => {
                self.process_axis_event(axis, event.value());
                false
            }
            InputEventKind::Key(key) => {
                self.process_key_event(key, event.value() != 0);
                false
            }
            InputEventKind::Synchronization(sync) => sync == Synchronization::SYN_REPORT,
            _ => false,
        }
    }

    fn process_axis_event(&mut self, axis: AbsoluteAxisType, raw: i32) {
        let value = self.calibration.apply(self.range.normalize(raw));
        match axis {
            AbsoluteAxisType::ABS_X => self.state.left_stick_x = value,
            AbsoluteAxisType::ABS_Y => self.state.left_stick_y = -value,
            AbsoluteAxisType::ABS_Z => self.state.right_stick_x = value,
            AbsoluteAxisType::ABS_RZ => self.state.right_stick_y = -value,
            // triggers, d-pad, motion sensors
            _ => {}
        }
    }

    fn process_key_event(&mut self, key: Key, pressed: bool) {
        match key {
            Key::BTN_SOUTH => self.state.btn_a = pressed,
            Key::BTN_EAST => self.state.btn_b = pressed,
            Key::BTN_NORTH => self.state.btn_x = pressed,
            Key::BTN_WEST => self.state.btn_y = pressed,
            _ => {}
        }
    }

    /// Back to centered sticks and released buttons
    pub fn reset(&mut self) {
        self.state = GamepadState::default();
    }
}
