//! # Error Types
//!
//! Custom error types for the PiRacer cluster using `thiserror`.
//!
//! Malformed CAN payloads have no variant here: the codec absorbs them and
//! returns clamped defaults instead of failing.

use thiserror::Error;

/// Main error type for the PiRacer cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    /// CAN bus could not be opened. Non-fatal: the cluster keeps driving
    /// with telemetry disabled.
    #[error("CAN connection error: {0}")]
    Connection(String),

    /// Transient I/O failure on an open bus
    #[error("CAN transport error: {0}")]
    Transport(String),

    /// Gamepad read failure, fatal to a single tick only
    #[error("Input read error: {0}")]
    InputRead(String),

    /// No usable gamepad found on the system
    #[error("No gamepad found")]
    ControllerNotFound,

    /// A collaborator failed to construct at startup
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the PiRacer cluster
pub type Result<T> = std::result::Result<T, ClusterError>;
