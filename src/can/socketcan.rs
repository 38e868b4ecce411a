//! # SocketCAN Transport
//!
//! Linux SocketCAN implementation of [`BusTransport`].
//!
//! Two independent raw sockets are opened on the interface, one for
//! receiving and one for transmitting. The kernel loops frames sent on the TX
//! socket back to the RX socket, so test speed frames sent by the control
//! loop show up in the telemetry feed just like sensor frames do.
//!
//! Reads block with `SO_RCVTIMEO` set to the requested timeout and run on
//! tokio's blocking pool.

use async_trait::async_trait;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::{closed_error, BusConnector, BusFrame, BusTransport, MAX_PAYLOAD_LEN};
use crate::error::{ClusterError, Result};

/// Opens [`SocketCanBus`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketCanConnector;

#[async_trait]
impl BusConnector for SocketCanConnector {
    async fn open(&self, interface: &str, bitrate: u32) -> Result<Arc<dyn BusTransport>> {
        let bus = SocketCanBus::open(interface, bitrate)?;
        Ok(Arc::new(bus))
    }
}

/// An open SocketCAN interface.
pub struct SocketCanBus {
    interface: String,
    rx: Arc<CanSocket>,
    tx: CanSocket,
    closed: AtomicBool,
}

impl std::fmt::Debug for SocketCanBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketCanBus")
            .field("interface", &self.interface)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SocketCanBus {
    /// Open `interface` (e.g. `can0`, `vcan0`).
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the interface does not exist or is down.
    pub fn open(interface: &str, bitrate: u32) -> Result<Self> {
        debug!("Opening SocketCAN interface {} (configured for {} bit/s)", interface, bitrate);

        let rx = Self::open_socket(interface)?;
        let tx = Self::open_socket(interface)?;

        info!("Opened SocketCAN interface {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            rx: Arc::new(rx),
            tx,
            closed: AtomicBool::new(false),
        })
    }

    fn open_socket(interface: &str) -> Result<CanSocket> {
        CanSocket::open(interface).map_err(|e| {
            ClusterError::Connection(format!("Failed to open {}: {}", interface, e))
        })
    }

    /// Name of the interface this handle is bound to
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn to_can_frame(frame: &BusFrame) -> io::Result<CanFrame> {
        let can_frame = if frame.is_extended() {
            ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, frame.payload()))
        } else {
            StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, frame.payload()))
        };

        can_frame.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Cannot build CAN frame with ID 0x{:X}", frame.id),
            )
        })
    }

    fn from_can_frame(can_frame: &CanFrame) -> BusFrame {
        let id = if can_frame.is_extended() {
            can_frame.raw_id() & 0x1FFF_FFFF
        } else {
            can_frame.raw_id() & 0x7FF
        };
        let data = can_frame.data();
        BusFrame::new(id, &data[..data.len().min(MAX_PAYLOAD_LEN)])
    }

    /// Data frames only. Error frames carry bus state and remote frames are
    /// requests with no payload; neither is a sensor reading.
    fn sensor_frame(can_frame: &CanFrame) -> Option<BusFrame> {
        match can_frame {
            CanFrame::Data(_) => Some(Self::from_can_frame(can_frame)),
            CanFrame::Remote(_) | CanFrame::Error(_) => None,
        }
    }

    fn read_blocking(socket: &CanSocket, timeout: Duration) -> io::Result<Option<BusFrame>> {
        socket.set_read_timeout(timeout)?;

        match socket.read_frame() {
            Ok(can_frame) => Ok(Self::sensor_frame(&can_frame)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BusTransport for SocketCanBus {
    async fn recv(&self, timeout: Duration) -> io::Result<Option<BusFrame>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        let rx = Arc::clone(&self.rx);
        tokio::task::spawn_blocking(move || Self::read_blocking(&rx, timeout))
            .await
            .map_err(|e| io::Error::other(format!("receive task failed: {}", e)))?
    }

    async fn send(&self, frame: &BusFrame) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        let can_frame = Self::to_can_frame(frame)?;
        self.tx.write_frame(&can_frame)?;

        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Closed SocketCAN interface {}", self.interface);
        }
    }
}
