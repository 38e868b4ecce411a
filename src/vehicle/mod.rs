//! # Vehicle Module
//!
//! Drive-side logic of the PiRacer.
//!
//! This module handles:
//! - The gear selector state machine and throttle shaping
//! - The actuator interface commands are forwarded to

pub mod actuator;
pub mod drive;

pub use actuator::{Actuator, TracingActuator};
pub use drive::{DriveCommand, DriveShaping, GearButtons, GearState};
