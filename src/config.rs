//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every key has a default, so an empty file (or no file) yields a working
//! setup on `vcan0`.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::can::{FrameIds, RPM_SENSOR_ID, SPEED_SENSOR_ID, STANDARD_ID_MAX};
use crate::controller::{AxisRange, Calibration, EventMapper};
use crate::error::{ClusterError, Result};
use crate::telemetry::{BusSettings, ReceiveTiming};
use crate::vehicle::DriveShaping;

/// Bitrates accepted by the vehicle's CAN transceivers
pub const SUPPORTED_BITRATES: [u32; 4] = [125_000, 250_000, 500_000, 1_000_000];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub control: ControlConfig,
    pub drive: DriveConfig,
    pub controller: ControllerConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

/// CAN bus configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    /// SocketCAN interface, or `loopback` for the in-memory bus
    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    #[serde(default = "default_speed_sensor_id")]
    pub speed_sensor_id: u32,

    #[serde(default = "default_rpm_sensor_id")]
    pub rpm_sensor_id: u32,

    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,

    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

/// Control loop cadence
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Tick period (ms)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Read telemetry every N ticks
    #[serde(default = "default_telemetry_every")]
    pub telemetry_every: u64,

    /// Send a test speed frame every M ticks
    #[serde(default = "default_test_frame_every")]
    pub test_frame_every: u64,

    /// Log a status line every P ticks
    #[serde(default = "default_status_every")]
    pub status_every: u64,

    #[serde(default = "default_send_test_frames")]
    pub send_test_frames: bool,
}

/// Throttle shaping
#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Fraction of full power available in Drive and Reverse
    #[serde(default = "default_power_cap")]
    pub power_cap: f32,
}

/// Gamepad configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Empty means auto-detect
    #[serde(default)]
    pub device_path: String,

    #[serde(default)]
    pub deadzone_stick: f32,

    #[serde(default)]
    pub expo: f32,

    #[serde(default = "default_axis_min")]
    pub axis_min: i32,

    #[serde(default = "default_axis_max")]
    pub axis_max: i32,
}

/// Cluster display configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    /// Speed older than this is shown as stale
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; empty disables file logging
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_interface() -> String { "vcan0".to_string() }
fn default_bitrate() -> u32 { 500_000 }
fn default_speed_sensor_id() -> u32 { SPEED_SENSOR_ID }
fn default_rpm_sensor_id() -> u32 { RPM_SENSOR_ID }
fn default_recv_timeout_ms() -> u64 { 1000 }
fn default_error_backoff_ms() -> u64 { 100 }
fn default_join_timeout_ms() -> u64 { 1000 }

fn default_tick_ms() -> u64 { 10 }
fn default_telemetry_every() -> u64 { 5 }
fn default_test_frame_every() -> u64 { 100 }
fn default_status_every() -> u64 { 500 }
fn default_send_test_frames() -> bool { true }

fn default_power_cap() -> f32 { 0.5 }

fn default_axis_min() -> i32 { 0 }
fn default_axis_max() -> i32 { 255 }

fn default_refresh_ms() -> u64 { 500 }
fn default_stale_after_ms() -> u64 { 2000 }

fn default_log_level() -> String { "info".to_string() }

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            bitrate: default_bitrate(),
            speed_sensor_id: default_speed_sensor_id(),
            rpm_sensor_id: default_rpm_sensor_id(),
            recv_timeout_ms: default_recv_timeout_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            telemetry_every: default_telemetry_every(),
            test_frame_every: default_test_frame_every(),
            status_every: default_status_every(),
            send_test_frames: default_send_test_frames(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            power_cap: default_power_cap(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_path: String::new(),
            deadzone_stick: 0.0,
            expo: 0.0,
            axis_min: default_axis_min(),
            axis_max: default_axis_max(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

impl BusConfig {
    /// Receiver settings for `interface`
    #[must_use]
    pub fn settings(&self, interface: &str) -> BusSettings {
        BusSettings {
            interface: interface.to_string(),
            bitrate: self.bitrate,
            ids: FrameIds {
                speed: self.speed_sensor_id,
                rpm: self.rpm_sensor_id,
            },
            timing: ReceiveTiming {
                recv_timeout: Duration::from_millis(self.recv_timeout_ms),
                error_backoff: Duration::from_millis(self.error_backoff_ms),
                join_timeout: Duration::from_millis(self.join_timeout_ms),
            },
        }
    }
}

impl ControlConfig {
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl DriveConfig {
    #[must_use]
    pub fn shaping(&self) -> DriveShaping {
        DriveShaping::new(self.power_cap)
    }
}

impl ControllerConfig {
    /// Configured device, `None` to auto-detect
    #[must_use]
    pub fn device(&self) -> Option<&Path> {
        if self.device_path.is_empty() {
            None
        } else {
            Some(Path::new(&self.device_path))
        }
    }

    /// Event mapper with the configured range and calibration
    #[must_use]
    pub fn mapper(&self) -> EventMapper {
        EventMapper::with_calibration(
            AxisRange::new(self.axis_min, self.axis_max),
            Calibration::new(self.deadzone_stick, self.expo),
        )
    }
}

impl DisplayConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

impl LoggingConfig {
    /// Directory for log files, `None` when file logging is off
    #[must_use]
    pub fn log_dir(&self) -> Option<&Path> {
        if self.log_dir.is_empty() {
            None
        } else {
            Some(Path::new(&self.log_dir))
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> ClusterError {
    ClusterError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Config` if it does not parse or
    /// fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let bus = &self.bus;
        if bus.interface.is_empty() {
            return Err(invalid("bus interface cannot be empty"));
        }

        if !SUPPORTED_BITRATES.contains(&bus.bitrate) {
            return Err(invalid(
                "bitrate must be one of: 125000, 250000, 500000, 1000000",
            ));
        }

        for (name, id) in [
            ("speed_sensor_id", bus.speed_sensor_id),
            ("rpm_sensor_id", bus.rpm_sensor_id),
        ] {
            if id > STANDARD_ID_MAX {
                return Err(invalid(format!(
                    "{} must be a standard 11-bit id (<= 0x7FF), got 0x{:X}",
                    name, id
                )));
            }
        }

        if bus.speed_sensor_id == bus.rpm_sensor_id {
            return Err(invalid("speed_sensor_id and rpm_sensor_id must differ"));
        }

        check_range("recv_timeout_ms", bus.recv_timeout_ms, 1, 10_000)?;
        check_range("error_backoff_ms", bus.error_backoff_ms, 1, 10_000)?;
        check_range("join_timeout_ms", bus.join_timeout_ms, 1, 10_000)?;

        let control = &self.control;
        check_range("tick_ms", control.tick_ms, 1, 1000)?;
        for (name, value) in [
            ("telemetry_every", control.telemetry_every),
            ("test_frame_every", control.test_frame_every),
            ("status_every", control.status_every),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        if !(self.drive.power_cap > 0.0 && self.drive.power_cap <= 1.0) {
            return Err(invalid("power_cap must be greater than 0.0 and at most 1.0"));
        }

        let controller = &self.controller;
        if !(0.0..=0.25).contains(&controller.deadzone_stick) {
            return Err(invalid("deadzone_stick must be between 0.0 and 0.25"));
        }

        if !(0.0..=1.0).contains(&controller.expo) {
            return Err(invalid("expo must be between 0.0 and 1.0"));
        }

        if controller.axis_min >= controller.axis_max {
            return Err(invalid("axis_min must be less than axis_max"));
        }

        if self.display.refresh_ms < 500 {
            return Err(invalid("refresh_ms must be at least 500 (2 Hz)"));
        }

        if self.display.stale_after_ms == 0 {
            return Err(invalid("stale_after_ms must be greater than 0"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}
