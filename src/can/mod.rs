//! # CAN Bus Module
//!
//! Field-bus plumbing for the speed sensor feed.
//!
//! This module handles:
//! - The `BusFrame` value passed between transports and the receiver
//! - Protocol constants for the speed and RPM sensor identifiers
//! - The `BusTransport` / `BusConnector` capability traits
//! - Payload encoding and decoding (see [`codec`])
//!
//! Bringing the interface up (`ip link set can0 up type can bitrate ...`) is
//! done by the operating system before the cluster starts.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub mod codec;
pub mod loopback;
pub mod socketcan;

/// CAN identifier of the speed sensor frame
pub const SPEED_SENSOR_ID: u32 = 0x123;

/// CAN identifier of the RPM sensor frame
pub const RPM_SENSOR_ID: u32 = 0x124;

/// Maximum payload length of a classic CAN frame
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Highest identifier representable in a standard (11-bit) frame
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// A single addressed message on the field bus.
///
/// Payload is stored inline so frames are `Copy` and never allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    /// CAN identifier
    pub id: u32,
    /// Payload bytes, zero-filled past `len`
    pub data: [u8; MAX_PAYLOAD_LEN],
    /// Valid payload length (0-8)
    pub len: u8,
}

impl BusFrame {
    /// Creates a frame, truncating the payload to 8 bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use piracer_cluster::can::BusFrame;
    ///
    /// let frame = BusFrame::new(0x124, &[0xB8, 0x0B]);
    /// assert_eq!(frame.payload(), &[0xB8, 0x0B]);
    /// ```
    #[must_use]
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        let len = payload.len().min(MAX_PAYLOAD_LEN);
        data[..len].copy_from_slice(&payload[..len]);

        Self {
            id,
            data,
            len: len as u8,
        }
    }

    /// Returns only the valid payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Whether the identifier needs a 29-bit extended frame.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.id > STANDARD_ID_MAX
    }
}

/// Identifiers the receiver recognizes.
///
/// Fixed for a given deployment; everything else on the bus is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIds {
    pub speed: u32,
    pub rpm: u32,
}

impl Default for FrameIds {
    fn default() -> Self {
        Self {
            speed: SPEED_SENSOR_ID,
            rpm: RPM_SENSOR_ID,
        }
    }
}

/// An open bus handle.
///
/// Methods take `&self` so the receive task and the control loop can share
/// one handle: the receive loop reads while the control loop sends test
/// frames.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Waits up to `timeout` for one frame. `Ok(None)` means the timeout
    /// elapsed with nothing received.
    async fn recv(&self, timeout: Duration) -> io::Result<Option<BusFrame>>;

    /// Transmits one frame, fire-and-forget.
    async fn send(&self, frame: &BusFrame) -> io::Result<()>;

    /// Releases the handle. Further `recv`/`send` calls fail with
    /// `NotConnected`. Calling it twice is harmless.
    async fn close(&self);
}

/// Opens bus handles by interface name.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Opens `interface`. `bitrate` is informational: the kernel interface
    /// must already be configured with it.
    async fn open(&self, interface: &str, bitrate: u32) -> Result<Arc<dyn BusTransport>>;
}

/// `NotConnected` error returned by closed handles.
pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "bus handle is closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_ids() {
        assert_eq!(SPEED_SENSOR_ID, 0x123);
        assert_eq!(RPM_SENSOR_ID, 0x124);

        let ids = FrameIds::default();
        assert_eq!(ids.speed, SPEED_SENSOR_ID);
        assert_eq!(ids.rpm, RPM_SENSOR_ID);
    }

    #[test]
    fn test_frame_truncates_long_payload() {
        let frame = BusFrame::new(0x123, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_frame_short_payload_zero_filled() {
        let frame = BusFrame::new(0x124, &[0xAA]);
        assert_eq!(frame.len, 1);
        assert_eq!(frame.payload(), &[0xAA]);
        assert_eq!(frame.data, [0xAA, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_frame() {
        let frame = BusFrame::new(0x123, &[]);
        assert_eq!(frame.len, 0);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_extended_id_detection() {
        assert!(!BusFrame::new(0x7FF, &[]).is_extended());
        assert!(BusFrame::new(0x800, &[]).is_extended());
        assert!(!BusFrame::new(SPEED_SENSOR_ID, &[]).is_extended());
    }
}
