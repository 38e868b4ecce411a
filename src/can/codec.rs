//! # Sensor Payload Codec
//!
//! Decodes speed and RPM payloads and encodes speed frames.
//!
//! ## Speed layouts
//!
//! Sensors emit one of two layouts on the speed identifier:
//!
//! | Payload length | Layout | Unit |
//! |----------------|--------|------|
//! | ≥ 4 bytes | `f32`, little-endian, bytes 0-3 | km/h |
//! | 2-3 bytes | `u16`, little-endian, bytes 0-1 | 0.1 km/h |
//!
//! ## RPM layout
//!
//! `u16`, little-endian, bytes 0-1.
//!
//! Decoders never fail: payloads shorter than 2 bytes decode to zero and
//! speed is clamped to be non-negative.

use super::MAX_PAYLOAD_LEN;

/// Scale of the compact integer speed layout (km/h per LSB)
pub const SPEED_INT_SCALE: f32 = 0.1;

/// Decode a speed payload in km/h.
///
/// # Examples
///
/// ```
/// use piracer_cluster::can::codec::decode_speed;
///
/// // f32 layout
/// assert_eq!(decode_speed(&42.5f32.to_le_bytes()), 42.5);
///
/// // u16 layout, 0.1 km/h per bit
/// assert!((decode_speed(&[0xFA, 0x00]) - 25.0).abs() < 1e-4);
///
/// // Too short
/// assert_eq!(decode_speed(&[0x01]), 0.0);
/// ```
#[must_use]
pub fn decode_speed(payload: &[u8]) -> f32 {
    let speed = if payload.len() >= 4 {
        f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]])
    } else if payload.len() >= 2 {
        f32::from(u16::from_le_bytes([payload[0], payload[1]])) * SPEED_INT_SCALE
    } else {
        return 0.0;
    };

    // f32::max discards NaN in favour of the other operand
    speed.max(0.0)
}

/// Decode an RPM payload.
///
/// # Examples
///
/// ```
/// use piracer_cluster::can::codec::decode_rpm;
///
/// assert_eq!(decode_rpm(&3000u16.to_le_bytes()), 3000);
/// assert_eq!(decode_rpm(&[]), 0);
/// ```
#[must_use]
pub fn decode_rpm(payload: &[u8]) -> u32 {
    if payload.len() < 2 {
        return 0;
    }

    u32::from(u16::from_le_bytes([payload[0], payload[1]]))
}

/// Encode a speed value as a full 8-byte frame payload.
///
/// Layout: `f32` little-endian followed by 4 zero bytes. The value is
/// written as-is; clamping happens only when decoding.
///
/// # Examples
///
/// ```
/// use piracer_cluster::can::codec::{decode_speed, encode_speed};
///
/// let payload = encode_speed(88.0);
/// assert_eq!(payload.len(), 8);
/// assert_eq!(decode_speed(&payload), 88.0);
/// ```
#[must_use]
pub fn encode_speed(speed_kmh: f32) -> [u8; MAX_PAYLOAD_LEN] {
    let mut payload = [0u8; MAX_PAYLOAD_LEN];
    payload[..4].copy_from_slice(&speed_kmh.to_le_bytes());
    payload
}
