//! # PiRacer Cluster Library
//!
//! Drive a PiRacer with a gamepad and show CAN speed telemetry on its
//! instrument cluster.
//!
//! This library provides the control and telemetry core: the gear state
//! machine and throttle shaping, the CAN receive pipeline with lock-free
//! sample publication, and the fixed-rate control loop that ties them
//! together while tolerating a missing or failing bus.

pub mod can;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod telemetry;
pub mod vehicle;
