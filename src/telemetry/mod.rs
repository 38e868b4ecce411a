//! # Telemetry Module
//!
//! Receives the vehicle speed/RPM feed from the CAN bus.
//!
//! This module handles:
//! - Connecting to and disconnecting from the bus
//! - Running the background receive loop as a cancellable tokio task
//! - Decoding recognized frames and publishing the latest sample
//! - Sending diagnostic speed frames for bench testing
//!
//! ## Sharing
//!
//! The latest [`TelemetrySample`] lives in a [`TelemetryCell`]. Every update
//! installs a complete new sample, so a reader gets either the old or the new
//! value and never a mix of the two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::can::codec::{decode_rpm, decode_speed, encode_speed};
use crate::can::{BusConnector, BusFrame, BusTransport, FrameIds};
use crate::error::{ClusterError, Result};

mod sample;

pub use sample::{TelemetryCell, TelemetrySample};

/// Timing of the receive loop and its shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveTiming {
    /// Longest single blocking read, bounding how long a stop request waits
    pub recv_timeout: Duration,
    /// Pause after a transport error before reading again
    pub error_backoff: Duration,
    /// How long `stop_receiving` waits for the loop to finish
    pub join_timeout: Duration,
}

impl Default for ReceiveTiming {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Bus endpoint the receiver connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub interface: String,
    pub bitrate: u32,
    pub ids: FrameIds,
    pub timing: ReceiveTiming,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
            bitrate: 500_000,
            ids: FrameIds::default(),
            timing: ReceiveTiming::default(),
        }
    }
}

/// Read-only view of the telemetry state.
///
/// Cheap to clone; hand one to any consumer that wants the latest sample
/// without owning the receiver.
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    latest: Arc<TelemetryCell>,
    connected: Arc<AtomicBool>,
}

impl TelemetryReader {
    /// Snapshot of the latest sample
    #[must_use]
    pub fn latest(&self) -> TelemetrySample {
        self.latest.load()
    }

    /// Link state
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Owns the bus handle and the background receive loop.
///
/// # Lifecycle
///
/// ```no_run
/// use piracer_cluster::can::socketcan::SocketCanConnector;
/// use piracer_cluster::telemetry::{BusSettings, TelemetryReceiver};
/// use std::sync::Arc;
///
/// # async fn demo() -> piracer_cluster::error::Result<()> {
/// let mut receiver = TelemetryReceiver::new(Arc::new(SocketCanConnector), BusSettings::default());
/// receiver.connect().await?;
/// receiver.start_receiving()?;
///
/// let sample = receiver.get_latest();
/// println!("{:.1} km/h, {} rpm", sample.speed_kmh, sample.rpm);
///
/// receiver.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct TelemetryReceiver {
    connector: Arc<dyn BusConnector>,
    settings: BusSettings,
    bus: Option<Arc<dyn BusTransport>>,
    connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    latest: Arc<TelemetryCell>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TelemetryReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReceiver")
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TelemetryReceiver {
    /// Creates a disconnected receiver.
    #[must_use]
    pub fn new(connector: Arc<dyn BusConnector>, settings: BusSettings) -> Self {
        Self {
            connector,
            settings,
            bus: None,
            connected: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            latest: Arc::new(TelemetryCell::new()),
            task: None,
        }
    }

    /// Bus endpoint settings
    #[must_use]
    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    /// Opens the bus handle. A no-op if already connected.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the transport cannot be opened. The receiver
    /// stays disconnected and `start_receiving` will refuse to run.
    pub async fn connect(&mut self) -> Result<()> {
        if self.bus.is_some() {
            return Ok(());
        }

        let bus = self
            .connector
            .open(&self.settings.interface, self.settings.bitrate)
            .await?;

        self.bus = Some(bus);
        self.connected.store(true, Ordering::Release);
        info!("Connected to CAN bus on {}", self.settings.interface);
        Ok(())
    }

    /// Spawns the receive loop. A second call while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if `connect` has not succeeded.
    pub fn start_receiving(&mut self) -> Result<()> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let bus = self.bus.clone().ok_or_else(|| {
            ClusterError::Connection("cannot start receiving: not connected".to_string())
        })?;

        // Fresh flag per task: a loop detached after a join timeout keeps
        // its own cleared flag and cannot be revived by a restart.
        self.running = Arc::new(AtomicBool::new(true));
        self.task = Some(tokio::spawn(receive_loop(
            bus,
            Arc::clone(&self.running),
            Arc::clone(&self.latest),
            self.settings.ids,
            self.settings.timing,
        )));

        info!("Started CAN receive loop");
        Ok(())
    }

    /// Asks the receive loop to exit and waits up to the join timeout.
    ///
    /// A loop stuck in a read past the timeout is left to finish on its own.
    pub async fn stop_receiving(&mut self) {
        self.running.store(false, Ordering::Release);

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(self.settings.timing.join_timeout, &mut task).await {
            Ok(Ok(())) => info!("Stopped CAN receive loop"),
            Ok(Err(e)) => warn!("CAN receive loop ended abnormally: {}", e),
            Err(_) => warn!(
                "CAN receive loop did not stop within {:?}, detaching",
                self.settings.timing.join_timeout
            ),
        }
    }

    /// Signals the receive loop to exit without waiting.
    ///
    /// Used from synchronous teardown paths where awaiting is impossible.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stops receiving, releases the bus handle and marks the link down.
    /// Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        self.stop_receiving().await;

        if let Some(bus) = self.bus.take() {
            bus.close().await;
            info!("Disconnected from CAN bus on {}", self.settings.interface);
        }

        self.connected.store(false, Ordering::Release);
    }

    /// Snapshot of the latest sample. Never torn.
    #[must_use]
    pub fn get_latest(&self) -> TelemetrySample {
        self.latest.load()
    }

    /// Latest speed alone
    #[must_use]
    pub fn current_speed(&self) -> f32 {
        self.latest.load().speed_kmh
    }

    /// Link state
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether the receive loop has been started and not stopped
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A cloneable read-only handle onto the same state
    #[must_use]
    pub fn reader(&self) -> TelemetryReader {
        TelemetryReader {
            latest: Arc::clone(&self.latest),
            connected: Arc::clone(&self.connected),
        }
    }

    /// Sends an arbitrary frame on the bus.
    ///
    /// # Errors
    ///
    /// `Connection` when disconnected, `Transport` when the send fails.
    pub async fn send_frame(&self, id: u32, payload: &[u8]) -> Result<()> {
        let bus = self.bus.as_ref().ok_or_else(|| {
            ClusterError::Connection("cannot send: not connected".to_string())
        })?;

        bus.send(&BusFrame::new(id, payload))
            .await
            .map_err(|e| ClusterError::Transport(format!("Failed to send frame 0x{:X}: {}", id, e)))
    }

    /// Sends a speed frame on the speed identifier, standing in for a sensor.
    ///
    /// # Errors
    ///
    /// Same as [`send_frame`](Self::send_frame).
    pub async fn send_test_speed(&self, speed_kmh: f32) -> Result<()> {
        self.send_frame(self.settings.ids.speed, &encode_speed(speed_kmh))
            .await?;
        debug!("Sent test speed frame: {:.1} km/h", speed_kmh);
        Ok(())
    }
}

impl Drop for TelemetryReceiver {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Body of the background receive task.
async fn receive_loop(
    bus: Arc<dyn BusTransport>,
    running: Arc<AtomicBool>,
    latest: Arc<TelemetryCell>,
    ids: FrameIds,
    timing: ReceiveTiming,
) {
    while running.load(Ordering::Acquire) {
        match bus.recv(timing.recv_timeout).await {
            Ok(Some(frame)) => apply_frame(&latest, ids, &frame),
            Ok(None) => {}
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    warn!("Error receiving CAN frame: {}", e);
                }
                tokio::time::sleep(timing.error_backoff).await;
            }
        }
    }

    debug!("CAN receive loop exiting");
}

/// Decodes a recognized frame into the cell; anything else is dropped.
fn apply_frame(latest: &TelemetryCell, ids: FrameIds, frame: &BusFrame) {
    if frame.id == ids.speed {
        let speed_kmh = decode_speed(frame.payload());
        latest.record_speed(speed_kmh, chrono::Utc::now());
        trace!("Speed: {:.1} km/h", speed_kmh);
    } else if frame.id == ids.rpm {
        let rpm = decode_rpm(frame.payload());
        latest.record_rpm(rpm);
        trace!("RPM: {}", rpm);
    }
}
