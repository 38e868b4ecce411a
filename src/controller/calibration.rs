//! # Calibration Module
//!
//! Converts raw stick readings into normalized axis values and optionally
//! shapes them with a deadzone and exponential curve.
//!
//! ## Axis Range
//!
//! Gamepads report sticks as integers over a device-specific range
//! (0-255 for most USB pads). [`AxisRange`] maps that range onto
//! -1.0..=1.0. The rest position is the integer midpoint (128 for 0-255) and
//! maps to exactly 0.0; each half of the travel is scaled separately, so the
//! endpoints still reach -1.0 and 1.0.
//!
//! ## Deadzone and Expo
//!
//! The curve is `output = (1 - expo) * input + expo * input³`, applied after
//! the deadzone has been removed and the remaining travel rescaled to 0..1.
//! The default calibration is linear, so the drive shaping sees raw axes.
//!
//! ```
//! use piracer_cluster::controller::calibration::Calibration;
//!
//! let cal = Calibration::new(0.05, 0.3);
//! assert_eq!(cal.apply(0.02), 0.0);
//! assert!((cal.apply(1.0) - 1.0).abs() < 0.001);
//! ```

/// Raw integer range reported by a stick axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    min: i32,
    max: i32,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

impl AxisRange {
    /// Creates a range; bounds are swapped if given in the wrong order.
    #[must_use]
    pub fn new(min: i32, max: i32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    #[must_use]
    pub fn min(&self) -> i32 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> i32 {
        self.max
    }

    /// Maps a raw value to -1.0..=1.0, clamping values outside the range.
    ///
    /// A degenerate range (min == max) always yields 0.0.
    ///
    /// # Examples
    ///
    /// ```
    /// use piracer_cluster::controller::calibration::AxisRange;
    ///
    /// let range = AxisRange::default();
    /// assert_eq!(range.normalize(0), -1.0);
    /// assert_eq!(range.normalize(255), 1.0);
    /// assert_eq!(range.normalize(128), 0.0);
    /// ```
    #[must_use]
    pub fn normalize(&self, raw: i32) -> f32 {
        let center = self.center();
        let offset = i64::from(raw.clamp(self.min, self.max)) - i64::from(center);

        // A non-zero offset implies a non-empty half on that side
        match offset.signum() {
            1 => offset as f32 / (i64::from(self.max) - i64::from(center)) as f32,
            -1 => offset as f32 / (i64::from(center) - i64::from(self.min)) as f32,
            _ => 0.0,
        }
    }

    /// Raw rest position: the midpoint, rounded up for even-sized ranges.
    #[must_use]
    pub fn center(&self) -> i32 {
        let span = i64::from(self.max) - i64::from(self.min);
        (i64::from(self.min) + (span + 1) / 2) as i32
    }
}

/// Applies deadzone and exponential curve to a normalized input.
///
/// Input and output are in the range -1.0 to 1.0, where 0.0 is center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Deadzone as a fraction (0.0 to 0.25).
    deadzone: f32,
    /// Exponential curve factor (0.0 to 1.0).
    expo: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::linear()
    }
}

impl Calibration {
    /// Creates a calibration, clamping deadzone to 0.0..=0.25 and expo to
    /// 0.0..=1.0.
    #[must_use]
    pub fn new(deadzone: f32, expo: f32) -> Self {
        Self {
            deadzone: deadzone.clamp(0.0, 0.25),
            expo: expo.clamp(0.0, 1.0),
        }
    }

    /// Pass-through calibration (no deadzone, no expo).
    ///
    /// ```
    /// use piracer_cluster::controller::calibration::Calibration;
    ///
    /// assert_eq!(Calibration::linear().apply(0.5), 0.5);
    /// ```
    #[must_use]
    pub fn linear() -> Self {
        Self {
            deadzone: 0.0,
            expo: 0.0,
        }
    }

    #[must_use]
    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    #[must_use]
    pub fn expo(&self) -> f32 {
        self.expo
    }

    /// Whether this calibration leaves inputs untouched
    #[must_use]
    pub fn is_linear(&self) -> bool {
        self.deadzone == 0.0 && self.expo == 0.0
    }

    /// Applies deadzone then expo, preserving sign.
    #[must_use]
    pub fn apply(&self, input: f32) -> f32 {
        if self.is_linear() {
            return input;
        }
        let shaped = self.apply_expo(self.apply_deadzone(input.abs()));
        shaped.copysign(input)
    }

    #[inline]
    fn apply_deadzone(&self, magnitude: f32) -> f32 {
        if magnitude <= self.deadzone {
            0.0
        } else {
            (magnitude - self.deadzone) / (1.0 - self.deadzone)
        }
    }

    #[inline]
    fn apply_expo(&self, magnitude: f32) -> f32 {
        (1.0 - self.expo) * magnitude + self.expo * magnitude.powi(3)
    }
}
