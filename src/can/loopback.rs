//! # Loopback Bus
//!
//! In-memory virtual bus. Every frame sent by any handle is delivered to
//! every open handle, including the sender, mirroring `vcan` with
//! `receive_own_messages` enabled.
//!
//! Selected from the command line with the interface name `loopback` for
//! bench runs without CAN hardware. Tests also use [`LoopbackConnector::inject`]
//! to play the role of a sensor.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use super::{closed_error, BusConnector, BusFrame, BusTransport};
use crate::error::{ClusterError, Result};

/// Interface name that selects the loopback bus
pub const LOOPBACK_INTERFACE: &str = "loopback";

/// Frames buffered per handle before the slowest reader starts losing them
const CHANNEL_CAPACITY: usize = 256;

/// Creates handles onto one shared in-memory bus.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    wire: broadcast::Sender<BusFrame>,
    available: bool,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// A working loopback bus
    #[must_use]
    pub fn new() -> Self {
        let (wire, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            wire,
            available: true,
        }
    }

    /// A bus whose `open` always fails, simulating a transport that is down.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Puts a frame on the wire as if an external node sent it.
    ///
    /// Returns the number of open handles that will see it.
    pub fn inject(&self, frame: BusFrame) -> usize {
        self.wire.send(frame).unwrap_or(0)
    }
}

#[async_trait]
impl BusConnector for LoopbackConnector {
    async fn open(&self, interface: &str, _bitrate: u32) -> Result<Arc<dyn BusTransport>> {
        if !self.available {
            return Err(ClusterError::Connection(format!(
                "{}: transport unavailable",
                interface
            )));
        }

        debug!("Opened loopback bus handle for {}", interface);
        Ok(Arc::new(LoopbackBus {
            wire: self.wire.clone(),
            inbox: Mutex::new(self.wire.subscribe()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One handle onto a loopback bus.
#[derive(Debug)]
pub struct LoopbackBus {
    wire: broadcast::Sender<BusFrame>,
    inbox: Mutex<broadcast::Receiver<BusFrame>>,
    closed: AtomicBool,
}

#[async_trait]
impl BusTransport for LoopbackBus {
    async fn recv(&self, timeout: Duration) -> io::Result<Option<BusFrame>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Loopback reader lagged, {} frames dropped", skipped);
                Ok(None)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(closed_error()),
            Err(_) => Ok(None),
        }
    }

    async fn send(&self, frame: &BusFrame) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }

        // No receivers is not an error on a broadcast medium
        let _ = self.wire.send(*frame);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::{RPM_SENSOR_ID, SPEED_SENSOR_ID};

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_sent_frames_echo_to_sender() {
        let connector = LoopbackConnector::new();
        let bus = connector.open(LOOPBACK_INTERFACE, 500_000).await.unwrap();

        let frame = BusFrame::new(SPEED_SENSOR_ID, &[1, 2, 3, 4]);
        bus.send(&frame).await.unwrap();

        assert_eq!(bus.recv(SHORT).await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_injected_frames_reach_all_handles() {
        let connector = LoopbackConnector::new();
        let a = connector.open(LOOPBACK_INTERFACE, 500_000).await.unwrap();
        let b = connector.open(LOOPBACK_INTERFACE, 500_000).await.unwrap();

        let frame = BusFrame::new(RPM_SENSOR_ID, &3000u16.to_le_bytes());
        assert_eq!(connector.inject(frame), 2);

        assert_eq!(a.recv(SHORT).await.unwrap(), Some(frame));
        assert_eq!(b.recv(SHORT).await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_recv_times_out_with_none() {
        let connector = LoopbackConnector::new();
        let bus = connector.open(LOOPBACK_INTERFACE, 500_000).await.unwrap();
        assert_eq!(bus.recv(SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_connector_fails_to_open() {
        let connector = LoopbackConnector::unavailable();
        match connector.open("vcan0", 500_000).await {
            Err(ClusterError::Connection(msg)) => assert!(msg.contains("vcan0")),
            Err(other) => panic!("Expected Connection error, got: {:?}", other),
            Ok(_) => panic!("Expected open to fail"),
        }
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_io() {
        let connector = LoopbackConnector::new();
        let bus = connector.open(LOOPBACK_INTERFACE, 500_000).await.unwrap();
        bus.close().await;
        bus.close().await;

        let err = bus.recv(SHORT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let err = bus.send(&BusFrame::new(1, &[])).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_inject_without_handles() {
        let connector = LoopbackConnector::new();
        assert_eq!(connector.inject(BusFrame::new(SPEED_SENSOR_ID, &[])), 0);
    }
}
