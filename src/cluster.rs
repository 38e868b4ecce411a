//! # Control Loop
//!
//! The fixed-rate scheduler tying the cluster together. Each tick:
//!
//! 1. Read the gamepad. A read error skips actuation for this tick only.
//! 2. Run the gear machine on this tick's button presses and forward the
//!    command to the actuator.
//! 3. Every `telemetry_every` ticks, if the bus is up, take the latest
//!    telemetry sample; on ticks that are also multiples of
//!    `test_frame_every`, send a test speed frame of `|throttle| * 100`.
//! 4. Every `status_every` ticks, log a status line.
//! 5. Push a snapshot to the display, at most twice a second.
//!
//! Shutdown disconnects the bus and zeroes the actuator exactly once, either
//! from [`ControlLoop::shutdown`] or, failing that, on drop.

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::controller::InputDevice;
use crate::display::{Display, DisplaySnapshot, RefreshGate, MIN_REFRESH_INTERVAL};
use crate::telemetry::{TelemetryReceiver, TelemetrySample};
use crate::vehicle::{Actuator, DriveCommand, DriveShaping, GearButtons, GearState};

/// Test speed sent per unit of throttle
const TEST_SPEED_PER_THROTTLE: f32 = 100.0;

/// Cadence of the control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopSettings {
    pub tick: Duration,
    pub telemetry_every: u64,
    pub test_frame_every: u64,
    pub status_every: u64,
    pub send_test_frames: bool,
    pub refresh: Duration,
    pub stale_after: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            telemetry_every: 5,
            test_frame_every: 100,
            status_every: 500,
            send_test_frames: true,
            refresh: MIN_REFRESH_INTERVAL,
            stale_after: Duration::from_secs(2),
        }
    }
}

impl LoopSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: config.control.tick_period(),
            telemetry_every: config.control.telemetry_every,
            test_frame_every: config.control.test_frame_every,
            status_every: config.control.status_every,
            send_test_frames: config.control.send_test_frames,
            refresh: config.display.refresh_interval(),
            stale_after: config.display.stale_after(),
        }
    }
}

/// Owns every collaborator for the lifetime of the process.
pub struct ControlLoop {
    input: Box<dyn InputDevice>,
    actuator: Box<dyn Actuator>,
    display: Box<dyn Display>,
    telemetry: TelemetryReceiver,
    shaping: DriveShaping,
    settings: LoopSettings,
    gate: RefreshGate,
    gear: GearState,
    previous_buttons: GearButtons,
    input_failing: bool,
    command: DriveCommand,
    sample: TelemetrySample,
    tick_count: u64,
    cleaned_up: bool,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("telemetry", &self.telemetry)
            .field("settings", &self.settings)
            .field("gear", &self.gear)
            .field("command", &self.command)
            .field("tick_count", &self.tick_count)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    /// A loop in Neutral with default shaping and cadence.
    pub fn new(
        input: Box<dyn InputDevice>,
        actuator: Box<dyn Actuator>,
        display: Box<dyn Display>,
        telemetry: TelemetryReceiver,
    ) -> Self {
        let settings = LoopSettings::default();
        Self {
            input,
            actuator,
            display,
            telemetry,
            shaping: DriveShaping::default(),
            gate: RefreshGate::new(settings.refresh),
            settings,
            gear: GearState::default(),
            previous_buttons: GearButtons::default(),
            input_failing: false,
            command: DriveCommand::default(),
            sample: TelemetrySample::default(),
            tick_count: 0,
            cleaned_up: false,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.gate = RefreshGate::new(settings.refresh);
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_shaping(mut self, shaping: DriveShaping) -> Self {
        self.shaping = shaping;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Gear the vehicle is in now
    pub fn gear(&self) -> GearState {
        self.gear
    }

    /// Whether the last input read failed
    pub fn input_failing(&self) -> bool {
        self.input_failing
    }

    /// Last command sent to the actuator
    pub fn last_command(&self) -> DriveCommand {
        self.command
    }

    /// Telemetry as of the last read
    pub fn sample(&self) -> TelemetrySample {
        self.sample
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn telemetry(&self) -> &TelemetryReceiver {
        &self.telemetry
    }

    /// What the display would show now
    pub fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            speed_kmh: self.sample.speed_kmh,
            gear: self.gear,
            connected: self.telemetry.is_connected(),
            stale: self.sample.is_stale(Utc::now(), self.settings.stale_after),
        }
    }

    /// Runs one tick.
    pub async fn tick(&mut self) {
        self.drive();
        self.poll_telemetry().await;

        self.tick_count += 1;
        if is_due(self.tick_count, self.settings.status_every) {
            self.log_status();
        }

        if self.gate.ready(Instant::now()) {
            let snapshot = self.snapshot();
            self.display.update(&snapshot);
        }
    }

    fn drive(&mut self) {
        let state = match self.input.read() {
            Ok(state) => state,
            Err(e) => {
                // Warn once per outage; a dead reader fails every tick
                if self.input_failing {
                    debug!("Skipping actuation this tick: {}", e);
                } else {
                    warn!("Input unavailable, holding actuator until it recovers: {}", e);
                    self.input_failing = true;
                }
                return;
            }
        };
        if self.input_failing {
            info!("Input recovered");
            self.input_failing = false;
        }

        let buttons = state.gear_buttons();
        let edges = buttons.rising_edges(self.previous_buttons);
        self.previous_buttons = buttons;

        let command = self.shaping.step(
            self.gear,
            edges,
            state.throttle_axis(),
            state.steering_axis(),
        );
        if command.gear != self.gear {
            info!("Gear {} -> {}", self.gear, command.gear);
        }

        self.actuator.set_throttle(command.throttle);
        self.actuator.set_steering(command.steering);
        self.gear = command.gear;
        self.command = command;
    }

    async fn poll_telemetry(&mut self) {
        if !self.telemetry.is_connected() || !is_due(self.tick_count, self.settings.telemetry_every) {
            return;
        }

        self.sample = self.telemetry.get_latest();

        if self.settings.send_test_frames && is_due(self.tick_count, self.settings.test_frame_every) {
            let test_speed = self.command.throttle.abs() * TEST_SPEED_PER_THROTTLE;
            if let Err(e) = self.telemetry.send_test_speed(test_speed).await {
                warn!("Failed to send test speed frame: {}", e);
            }
        }
    }

    fn log_status(&self) {
        let age = self
            .sample
            .age(Utc::now())
            .map_or_else(|| "never".to_string(), |age| format!("{:.1}s", age.as_secs_f32()));
        info!(
            "Status: speed={:.1} km/h, rpm={}, gear={}, throttle={:.2}, steering={:.2}, CAN={}, sample age={}",
            self.sample.speed_kmh,
            self.sample.rpm,
            self.gear,
            self.command.throttle,
            self.command.steering,
            if self.telemetry.is_connected() { "connected" } else { "disconnected" },
            age
        );
    }

    /// Ticks at the configured period until `shutdown` resolves, then cleans
    /// up.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Control loop running every {:?}", self.settings.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                () = &mut shutdown => {
                    info!("Shutdown requested after {} ticks", self.tick_count);
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Disconnects the bus and zeroes the actuator. Only the first call does
    /// anything.
    pub async fn shutdown(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        self.telemetry.disconnect().await;
        self.actuator.stop();
        self.command = DriveCommand {
            gear: self.gear,
            ..DriveCommand::default()
        };
        info!("Cluster shut down");
    }
}

/// Whether `count` falls on a multiple of `every`; an `every` of 0 never fires.
fn is_due(count: u64, every: u64) -> bool {
    every != 0 && count % every == 0
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if !self.cleaned_up {
            debug!("Control loop dropped without shutdown, zeroing actuator");
            self.cleaned_up = true;
            self.actuator.stop();
            self.telemetry.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::codec::{decode_speed, encode_speed};
    use crate::can::loopback::{LoopbackConnector, LOOPBACK_INTERFACE};
    use crate::can::{BusConnector, BusFrame, BusTransport, RPM_SENSOR_ID, SPEED_SENSOR_ID};
    use crate::controller::GamepadState;
    use crate::display::{ConsoleDisplay, MockDisplay};
    use crate::error::{ClusterError, Result};
    use crate::telemetry::{BusSettings, ReceiveTiming};
    use crate::vehicle::actuator::MockActuator;
    use async_trait::async_trait;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Gamepad whose state the test controls. `None` fails the read.
    #[derive(Clone)]
    struct SharedInput(Arc<Mutex<Option<GamepadState>>>);

    impl SharedInput {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(Some(GamepadState::default()))))
        }

        fn set(&self, state: GamepadState) {
            *self.0.lock().unwrap() = Some(state);
        }

        fn unplug(&self) {
            *self.0.lock().unwrap() = None;
        }
    }

    impl InputDevice for SharedInput {
        fn read(&mut self) -> Result<GamepadState> {
            self.0
                .lock()
                .unwrap()
                .ok_or_else(|| ClusterError::InputRead("unplugged".to_string()))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Command {
        Throttle(f32),
        Steering(f32),
        Stop,
    }

    #[derive(Clone, Default)]
    struct RecordingActuator(Arc<Mutex<Vec<Command>>>);

    impl RecordingActuator {
        fn commands(&self) -> Vec<Command> {
            self.0.lock().unwrap().clone()
        }

        fn stops(&self) -> usize {
            self.commands().iter().filter(|c| **c == Command::Stop).count()
        }
    }

    impl Actuator for RecordingActuator {
        fn set_throttle(&mut self, percent: f32) {
            self.0.lock().unwrap().push(Command::Throttle(percent));
        }

        fn set_steering(&mut self, percent: f32) {
            self.0.lock().unwrap().push(Command::Steering(percent));
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().push(Command::Stop);
        }
    }

    /// Transport that records every frame sent and never receives.
    #[derive(Clone, Default)]
    struct CountingBus(Arc<Mutex<Vec<BusFrame>>>);

    impl CountingBus {
        fn sent(&self) -> Vec<BusFrame> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BusTransport for CountingBus {
        async fn recv(&self, timeout: Duration) -> io::Result<Option<BusFrame>> {
            tokio::time::sleep(timeout).await;
            Ok(None)
        }

        async fn send(&self, frame: &BusFrame) -> io::Result<()> {
            self.0.lock().unwrap().push(*frame);
            Ok(())
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl BusConnector for CountingBus {
        async fn open(&self, _interface: &str, _bitrate: u32) -> Result<Arc<dyn BusTransport>> {
            Ok(Arc::new(self.clone()))
        }
    }

    fn fast_bus() -> BusSettings {
        BusSettings {
            interface: LOOPBACK_INTERFACE.to_string(),
            timing: ReceiveTiming {
                recv_timeout: Duration::from_millis(20),
                error_backoff: Duration::from_millis(5),
                join_timeout: Duration::from_millis(500),
            },
            ..BusSettings::default()
        }
    }

    fn quiet_settings() -> LoopSettings {
        LoopSettings {
            send_test_frames: false,
            ..LoopSettings::default()
        }
    }

    fn pad(throttle: f32, steering: f32, a: bool, b: bool, x: bool, y: bool) -> GamepadState {
        GamepadState {
            right_stick_y: throttle,
            left_stick_x: steering,
            btn_a: a,
            btn_b: b,
            btn_x: x,
            btn_y: y,
            ..GamepadState::default()
        }
    }

    async fn connected_receiver(connector: &LoopbackConnector) -> TelemetryReceiver {
        let mut receiver = TelemetryReceiver::new(Arc::new(connector.clone()), fast_bus());
        receiver.connect().await.unwrap();
        receiver.start_receiving().unwrap();
        receiver
    }

    fn build(
        input: &SharedInput,
        actuator: impl Actuator + 'static,
        telemetry: TelemetryReceiver,
    ) -> ControlLoop {
        ControlLoop::new(
            Box::new(input.clone()),
            Box::new(actuator),
            Box::new(ConsoleDisplay::new(std::io::sink())),
            telemetry,
        )
    }

    /// Ticks until `check` passes on the loop's sample, or panics.
    async fn tick_until(control: &mut ControlLoop, check: impl Fn(&TelemetrySample) -> bool) {
        for _ in 0..500 {
            control.tick().await;
            if check(&control.sample()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("Condition not met, last sample: {:?}", control.sample());
    }

    #[tokio::test]
    async fn test_disconnected_loop_still_drives() {
        let mut receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        assert!(matches!(receiver.connect().await, Err(ClusterError::Connection(_))));

        let input = SharedInput::new();
        let actuator = RecordingActuator::default();
        let mut control = build(&input, actuator.clone(), receiver);

        // Press A in Neutral: gear changes, throttle still blocked
        input.set(pad(1.0, 0.4, true, false, false, false));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Drive);
        assert_eq!(control.last_command().throttle, 0.0);
        assert_eq!(control.last_command().steering, -0.4);

        control.tick().await;
        assert_eq!(control.last_command().throttle, 0.5);

        let snapshot = control.snapshot();
        assert!(!snapshot.connected);
        assert!(snapshot.stale);
        assert_eq!(snapshot.gear, GearState::Drive);

        assert_eq!(
            actuator.commands(),
            vec![
                Command::Throttle(0.0),
                Command::Steering(-0.4),
                Command::Throttle(0.5),
                Command::Steering(-0.4),
            ]
        );

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_held_button_does_not_retrigger() {
        let input = SharedInput::new();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = build(&input, RecordingActuator::default(), receiver);

        input.set(pad(0.0, 0.0, true, false, false, false));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Drive);

        // Park pressed while A is still held: only B is a new press
        input.set(pad(0.0, 0.0, true, true, false, false));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Park);

        // Releasing B with A held keeps Park
        input.set(pad(0.0, 0.0, true, false, false, false));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Park);

        // Release and press A again
        input.set(pad(0.0, 0.0, false, false, false, false));
        control.tick().await;
        input.set(pad(0.0, 0.0, true, false, false, false));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Drive);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_reverse_drive_sequence() {
        let input = SharedInput::new();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = build(&input, RecordingActuator::default(), receiver);

        input.set(pad(-1.0, 0.0, false, false, false, true));
        control.tick().await;
        assert_eq!(control.gear(), GearState::Reverse);

        input.set(pad(-1.0, 0.0, false, false, false, false));
        control.tick().await;
        assert_eq!(control.last_command().throttle, -0.5);

        // Forward stick in Reverse is blocked
        input.set(pad(0.8, 0.0, false, false, false, false));
        control.tick().await;
        assert_eq!(control.last_command().throttle, 0.0);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_input_error_skips_actuation() {
        let input = SharedInput::new();
        input.unplug();

        let mut actuator = MockActuator::new();
        actuator.expect_set_throttle().times(0);
        actuator.expect_set_steering().times(0);
        actuator.expect_stop().times(1).return_const(());

        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = build(&input, actuator, receiver);

        control.tick().await;
        control.tick().await;
        assert_eq!(control.tick_count(), 2);
        assert_eq!(control.gear(), GearState::Neutral);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_input_outage_tracked_until_recovery() {
        let input = SharedInput::new();
        let actuator = RecordingActuator::default();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = build(&input, actuator.clone(), receiver);

        control.tick().await;
        assert!(!control.input_failing());

        input.unplug();
        for _ in 0..3 {
            control.tick().await;
            assert!(control.input_failing());
        }
        assert_eq!(actuator.commands().len(), 2);

        input.set(pad(0.0, 0.3, false, false, false, false));
        control.tick().await;
        assert!(!control.input_failing());
        assert_eq!(actuator.commands().last(), Some(&Command::Steering(-0.3)));

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_input_error_keeps_gear() {
        let input = SharedInput::new();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = build(&input, RecordingActuator::default(), receiver);

        input.set(pad(0.0, 0.0, true, false, false, false));
        control.tick().await;
        input.unplug();
        control.tick().await;
        assert_eq!(control.gear(), GearState::Drive);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_speed_frame_reaches_loop() {
        let connector = LoopbackConnector::new();
        let receiver = connected_receiver(&connector).await;
        let input = SharedInput::new();
        let mut control =
            build(&input, RecordingActuator::default(), receiver).with_settings(quiet_settings());

        connector.inject(BusFrame::new(SPEED_SENSOR_ID, &encode_speed(42.5)));
        tick_until(&mut control, |s| s.speed_kmh == 42.5).await;

        assert_eq!(control.telemetry().get_latest().speed_kmh, 42.5);
        let snapshot = control.snapshot();
        assert!(snapshot.connected);
        assert!(!snapshot.stale);
        assert_eq!(snapshot.speed_kmh, 42.5);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_rpm_frame_reaches_loop() {
        let connector = LoopbackConnector::new();
        let receiver = connected_receiver(&connector).await;
        let input = SharedInput::new();
        let mut control =
            build(&input, RecordingActuator::default(), receiver).with_settings(quiet_settings());

        connector.inject(BusFrame::new(SPEED_SENSOR_ID, &encode_speed(18.0)));
        tick_until(&mut control, |s| s.speed_kmh == 18.0).await;

        connector.inject(BusFrame::new(RPM_SENSOR_ID, &3000u16.to_le_bytes()));
        tick_until(&mut control, |s| s.rpm == 3000).await;

        assert_eq!(control.sample().speed_kmh, 18.0);
        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_test_frame_follows_throttle() {
        let connector = LoopbackConnector::new();
        let receiver = connected_receiver(&connector).await;
        let input = SharedInput::new();
        let settings = LoopSettings {
            telemetry_every: 5,
            test_frame_every: 5,
            ..LoopSettings::default()
        };
        let mut control =
            build(&input, RecordingActuator::default(), receiver).with_settings(settings);

        // Tick 0 shifts into Drive with throttle still blocked
        input.set(pad(1.0, 0.0, true, false, false, false));
        control.tick().await;
        input.set(pad(1.0, 0.0, false, false, false, false));

        // Tick 5 sends |0.5| * 100 and the echo comes back as speed
        tick_until(&mut control, |s| s.speed_kmh == 50.0).await;
        assert!(control.tick_count() > 5);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_cadence_sends_one_test_frame_per_100_ticks() {
        let bus = CountingBus::default();
        let mut receiver = TelemetryReceiver::new(Arc::new(bus.clone()), fast_bus());
        receiver.connect().await.unwrap();

        let input = SharedInput::new();
        let mut control = build(&input, RecordingActuator::default(), receiver);
        assert_eq!(control.settings(), &LoopSettings::default());

        // Tick 0 shifts into Drive, so its frame still carries zero throttle
        input.set(pad(1.0, 0.0, true, false, false, false));
        control.tick().await;
        input.set(pad(1.0, 0.0, false, false, false, false));

        for _ in 1..200 {
            control.tick().await;
        }
        assert_eq!(control.tick_count(), 200);

        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|frame| frame.id == SPEED_SENSOR_ID));
        assert_eq!(decode_speed(sent[0].payload()), 0.0);
        assert_eq!(decode_speed(sent[1].payload()), 50.0);

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_test_frames_while_disconnected() {
        let bus = CountingBus::default();
        let receiver = TelemetryReceiver::new(Arc::new(bus.clone()), fast_bus());

        let input = SharedInput::new();
        input.set(pad(1.0, 0.0, true, false, false, false));
        let mut control = build(&input, RecordingActuator::default(), receiver);

        for _ in 0..200 {
            control.tick().await;
        }
        assert!(!control.telemetry().is_connected());
        assert!(bus.sent().is_empty());

        control.shutdown().await;
    }

    #[tokio::test]
    async fn test_telemetry_read_cadence() {
        let connector = LoopbackConnector::new();
        let receiver = connected_receiver(&connector).await;
        let input = SharedInput::new();
        let settings = LoopSettings {
            telemetry_every: 1000,
            send_test_frames: false,
            ..LoopSettings::default()
        };
        let mut control =
            build(&input, RecordingActuator::default(), receiver).with_settings(settings);

        // Tick 0 reads, then nothing until tick 1000
        control.tick().await;
        connector.inject(BusFrame::new(SPEED_SENSOR_ID, &encode_speed(7.0)));
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            if control.telemetry().get_latest().speed_kmh == 7.0 {
                break;
            }
        }
        assert_eq!(control.telemetry().get_latest().speed_kmh, 7.0);

        for _ in 0..10 {
            control.tick().await;
        }
        assert_eq!(control.sample().speed_kmh, 0.0);

        control.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cleans_up_once() {
        let connector = LoopbackConnector::new();
        let receiver = connected_receiver(&connector).await;
        let input = SharedInput::new();
        let actuator = RecordingActuator::default();
        let mut control = build(&input, actuator.clone(), receiver).with_settings(quiet_settings());

        input.set(pad(1.0, 0.5, true, false, false, false));
        control.run(tokio::time::sleep(Duration::from_millis(100))).await;

        assert!(control.tick_count() >= 10);
        assert!(!control.telemetry().is_connected());
        assert!(!control.telemetry().is_running());
        assert_eq!(actuator.stops(), 1);
        assert_eq!(actuator.commands().last(), Some(&Command::Stop));
        assert_eq!(control.last_command().throttle, 0.0);

        control.shutdown().await;
        drop(control);
        assert_eq!(actuator.stops(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_shutdown_zeroes_actuator() {
        let input = SharedInput::new();
        let actuator = RecordingActuator::default();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());

        let mut control = build(&input, actuator.clone(), receiver);
        control.tick().await;
        drop(control);

        assert_eq!(actuator.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_refresh_is_rate_limited() {
        let mut display = MockDisplay::new();
        display.expect_update().times(3).return_const(());

        let input = SharedInput::new();
        let receiver = TelemetryReceiver::new(Arc::new(LoopbackConnector::unavailable()), fast_bus());
        let mut control = ControlLoop::new(
            Box::new(input),
            Box::new(RecordingActuator::default()),
            Box::new(display),
            receiver,
        );

        // Refreshes at 0, 500 and 1000 ms
        control.run(tokio::time::sleep(Duration::from_millis(1250))).await;
        assert!(control.tick_count() >= 100);
    }

    #[test]
    fn test_loop_settings_from_config() {
        let mut config = Config::default();
        config.control.tick_ms = 20;
        config.control.send_test_frames = false;
        config.display.stale_after_ms = 750;

        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.tick, Duration::from_millis(20));
        assert!(!settings.send_test_frames);
        assert_eq!(settings.stale_after, Duration::from_millis(750));
        assert_eq!(settings.status_every, 500);
    }
}
