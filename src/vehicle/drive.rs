//! # Gear and Drive Shaping
//!
//! The gear selector is a sticky four-state machine driven by button
//! presses. Each tick the throttle is shaped by the gear the vehicle was in
//! during that tick, before any gear change the same tick's buttons request.
//!
//! | Gear | Throttle | Steering |
//! |------|----------|----------|
//! | Drive | `max(0, raw) * cap` | `-raw` |
//! | Reverse | `min(0, raw) * cap` | `-raw` |
//! | Park | `0.0` | `-raw` |
//! | Neutral | `0.0` | `-raw` |
//!
//! `cap` defaults to 0.5. Steering is never gated.

use std::fmt;

/// Default fraction of full power available in Drive and Reverse.
pub const DEFAULT_POWER_CAP: f32 = 0.5;

/// Gear selector position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GearState {
    Park,
    #[default]
    Neutral,
    Drive,
    Reverse,
}

impl GearState {
    /// Single-letter label shown on the cluster
    #[must_use]
    pub fn label(self) -> char {
        match self {
            GearState::Park => 'P',
            GearState::Neutral => 'N',
            GearState::Drive => 'D',
            GearState::Reverse => 'R',
        }
    }

    /// Whether throttle is blocked in this gear
    #[must_use]
    pub fn blocks_motion(self) -> bool {
        matches!(self, GearState::Park | GearState::Neutral)
    }
}

impl fmt::Display for GearState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The four gear-selection buttons.
///
/// Used both for current button levels and, via
/// [`rising_edges`](Self::rising_edges), for the presses that happened since
/// the previous tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GearButtons {
    pub drive: bool,
    pub park: bool,
    pub neutral: bool,
    pub reverse: bool,
}

impl GearButtons {
    /// Buttons that are down now but were up in `previous`.
    ///
    /// # Examples
    ///
    /// ```
    /// use piracer_cluster::vehicle::drive::GearButtons;
    ///
    /// let held = GearButtons { drive: true, ..Default::default() };
    /// assert_eq!(held.rising_edges(GearButtons::default()), held);
    /// assert_eq!(held.rising_edges(held), GearButtons::default());
    /// ```
    #[must_use]
    pub fn rising_edges(self, previous: Self) -> Self {
        Self {
            drive: self.drive && !previous.drive,
            park: self.park && !previous.park,
            neutral: self.neutral && !previous.neutral,
            reverse: self.reverse && !previous.reverse,
        }
    }

    /// Gear requested by these buttons, first match in priority order
    /// Drive > Park > Neutral > Reverse.
    #[must_use]
    pub fn selected_gear(self) -> Option<GearState> {
        if self.drive {
            Some(GearState::Drive)
        } else if self.park {
            Some(GearState::Park)
        } else if self.neutral {
            Some(GearState::Neutral)
        } else if self.reverse {
            Some(GearState::Reverse)
        } else {
            None
        }
    }

    /// Whether any gear button is set
    #[must_use]
    pub fn any(self) -> bool {
        self.drive || self.park || self.neutral || self.reverse
    }
}

/// One tick's actuator command and resulting gear.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveCommand {
    /// Shaped throttle in [-1, 1]
    pub throttle: f32,
    /// Steering in [-1, 1]
    pub steering: f32,
    /// Gear after this tick's transition
    pub gear: GearState,
}

/// Throttle shaping policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveShaping {
    power_cap: f32,
}

impl Default for DriveShaping {
    fn default() -> Self {
        Self {
            power_cap: DEFAULT_POWER_CAP,
        }
    }
}

impl DriveShaping {
    /// Shaping with a custom power cap, clamped to [0, 1].
    #[must_use]
    pub fn new(power_cap: f32) -> Self {
        Self {
            power_cap: power_cap.clamp(0.0, 1.0),
        }
    }

    /// Configured power cap
    #[must_use]
    pub fn power_cap(&self) -> f32 {
        self.power_cap
    }

    /// Throttle allowed in `gear` for a raw axis value.
    #[must_use]
    pub fn shape_throttle(&self, gear: GearState, raw_throttle: f32) -> f32 {
        let raw = raw_throttle.clamp(-1.0, 1.0);
        match gear {
            GearState::Drive => raw.max(0.0) * self.power_cap,
            GearState::Reverse => raw.min(0.0) * self.power_cap,
            GearState::Park | GearState::Neutral => 0.0,
        }
    }

    /// Runs one tick of the gear machine.
    ///
    /// `edges` are the button presses of this tick (see
    /// [`GearButtons::rising_edges`]). Throttle is shaped with `gear`, the
    /// gear held during the tick; the returned command carries the new gear.
    ///
    /// # Examples
    ///
    /// ```
    /// use piracer_cluster::vehicle::drive::{DriveShaping, GearButtons, GearState};
    ///
    /// let shaping = DriveShaping::default();
    /// let press_drive = GearButtons { drive: true, ..Default::default() };
    ///
    /// // Shifting out of Neutral: this tick is still blocked
    /// let cmd = shaping.step(GearState::Neutral, press_drive, 1.0, 0.2);
    /// assert_eq!(cmd.gear, GearState::Drive);
    /// assert_eq!(cmd.throttle, 0.0);
    /// assert_eq!(cmd.steering, -0.2);
    ///
    /// // Next tick in Drive: half power
    /// let cmd = shaping.step(cmd.gear, GearButtons::default(), 1.0, 0.0);
    /// assert_eq!(cmd.throttle, 0.5);
    /// ```
    #[must_use]
    pub fn step(
        &self,
        gear: GearState,
        edges: GearButtons,
        raw_throttle: f32,
        raw_steering: f32,
    ) -> DriveCommand {
        DriveCommand {
            throttle: self.shape_throttle(gear, raw_throttle),
            steering: -raw_steering.clamp(-1.0, 1.0),
            gear: edges.selected_gear().unwrap_or(gear),
        }
    }
}

/// [`DriveShaping::step`] with the default power cap.
#[must_use]
pub fn step(
    gear: GearState,
    edges: GearButtons,
    raw_throttle: f32,
    raw_steering: f32,
) -> DriveCommand {
    DriveShaping::default().step(gear, edges, raw_throttle, raw_steering)
}
