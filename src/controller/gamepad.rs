//! # Evdev Gamepad
//!
//! Detects a gamepad under `/dev/input` and streams its events on a tokio
//! task. The task folds events through an [`EventMapper`] and publishes a
//! complete [`GamepadState`] after every `SYN_REPORT` on a `watch` channel,
//! so reads from the control loop never block.
//!
//! A device qualifies as a gamepad when it reports `BTN_SOUTH` and the
//! `ABS_RZ` axis. Detection can be bypassed with an explicit device path.

use evdev::{AbsoluteAxisType, Device, EventStream, Key};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::mapper::EventMapper;
use super::{GamepadState, InputDevice};
use crate::error::{ClusterError, Result};

const INPUT_DIR: &str = "/dev/input";

/// Receiving end of a published gamepad state.
///
/// Reads return the latest complete state; once the publisher is gone every
/// read fails with `InputRead`.
#[derive(Debug)]
pub struct GamepadFeed {
    state: watch::Receiver<GamepadState>,
}

impl GamepadFeed {
    /// Creates a feed and the sender that publishes into it.
    #[must_use]
    pub fn channel() -> (watch::Sender<GamepadState>, Self) {
        let (tx, rx) = watch::channel(GamepadState::default());
        (tx, Self { state: rx })
    }
}

impl InputDevice for GamepadFeed {
    fn read(&mut self) -> Result<GamepadState> {
        if self.state.has_changed().is_err() {
            return Err(ClusterError::InputRead("gamepad disconnected".to_string()));
        }
        Ok(*self.state.borrow_and_update())
    }
}

/// A gamepad read through evdev.
///
/// Must be opened from within a tokio runtime. Dropping it stops the reader
/// task.
#[derive(Debug)]
pub struct EvdevGamepad {
    feed: GamepadFeed,
    reader: JoinHandle<()>,
    device_path: PathBuf,
    name: Option<String>,
}

impl EvdevGamepad {
    /// Opens the gamepad at `device_path`, or the first detected one.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: nothing under `/dev/input` looks like a gamepad
    /// - `Initialization`: the device could not be opened or streamed
    pub fn open(device_path: Option<&Path>, mapper: EventMapper) -> Result<Self> {
        let (path, device) = match device_path {
            Some(path) => {
                let device = Device::open(path).map_err(|e| {
                    ClusterError::Initialization(format!(
                        "Failed to open gamepad {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                (path.to_path_buf(), device)
            }
            None => find_gamepad()?,
        };

        let name = device.name().map(str::to_string);
        info!(
            "Using gamepad {} ({})",
            path.display(),
            name.as_deref().unwrap_or("unnamed")
        );

        let events = device.into_event_stream().map_err(|e| {
            ClusterError::Initialization(format!("Failed to stream gamepad events: {}", e))
        })?;

        let (tx, feed) = GamepadFeed::channel();
        let reader = tokio::spawn(read_events(events, mapper, tx));

        Ok(Self {
            feed,
            reader,
            device_path: path,
            name,
        })
    }

    #[must_use]
    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl InputDevice for EvdevGamepad {
    fn read(&mut self) -> Result<GamepadState> {
        self.feed.read()
    }
}

impl Drop for EvdevGamepad {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_events(
    mut events: EventStream,
    mut mapper: EventMapper,
    tx: watch::Sender<GamepadState>,
) {
    loop {
        match events.next_event().await {
            Ok(event) => {
                if mapper.process_event(&event) && tx.send(mapper.state()).is_err() {
                    debug!("Gamepad feed closed, stopping reader");
                    break;
                }
            }
            Err(e) => {
                error!("Gamepad read failed: {}", e);
                break;
            }
        }
    }
}

/// Scans `/dev/input/event*` in name order for the first gamepad.
fn find_gamepad() -> Result<(PathBuf, Device)> {
    let input_dir = Path::new(INPUT_DIR);

    let mut entries: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .map_err(|e| {
            warn!("Cannot read {}: {}", input_dir.display(), e);
            ClusterError::ControllerNotFound
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("event"))
        })
        .collect();
    entries.sort();

    for path in entries {
        match Device::open(&path) {
            Ok(device) => {
                debug!(
                    "Found input device: {} ({})",
                    path.display(),
                    device.name().unwrap_or("unnamed")
                );
                if is_gamepad(&device) {
                    return Ok((path, device));
                }
            }
            Err(e) => debug!("Could not open {}: {}", path.display(), e),
        }
    }

    Err(ClusterError::ControllerNotFound)
}

fn is_gamepad(device: &Device) -> bool {
    let has_face_button = device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::BTN_SOUTH));
    let has_right_stick = device
        .supported_absolute_axes()
        .is_some_and(|axes| axes.contains(AbsoluteAxisType::ABS_RZ));
    has_face_button && has_right_stick
}
