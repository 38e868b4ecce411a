//! # PiRacer Cluster
//!
//! Drive a PiRacer with a gamepad and show CAN speed telemetry.
//!
//! ```text
//! piracer-cluster [INTERFACE] [--config PATH]
//! ```
//!
//! `INTERFACE` is a SocketCAN interface (`vcan0` by default) or `loopback`
//! for an in-memory bus when no CAN hardware is attached. A bus that cannot
//! be opened is not fatal: the vehicle stays drivable with telemetry off.
//!
//! Exit code 0 after Ctrl+C, 1 when startup fails (bad config, no gamepad).

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use piracer_cluster::can::loopback::{LoopbackConnector, LOOPBACK_INTERFACE};
use piracer_cluster::can::socketcan::SocketCanConnector;
use piracer_cluster::can::BusConnector;
use piracer_cluster::cluster::{ControlLoop, LoopSettings};
use piracer_cluster::config::{Config, LoggingConfig};
use piracer_cluster::controller::EvdevGamepad;
use piracer_cluster::display::{ConsoleDisplay, Display};
use piracer_cluster::telemetry::TelemetryReceiver;
use piracer_cluster::vehicle::TracingActuator;

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "piracer-cluster.log";

#[derive(Parser, Debug)]
#[command(name = "piracer-cluster", version)]
#[command(about = "Gamepad drive control and CAN speed telemetry for a PiRacer", long_about = None)]
struct Cli {
    /// CAN interface (e.g. can0, vcan0), or `loopback` for the in-memory bus
    interface: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    };

    // Log with default settings if the config itself is broken
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    let _guard = init_logging(&logging);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let interface = cli
        .interface
        .unwrap_or_else(|| config.bus.interface.clone());

    match run(interface, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Installs the stderr subscriber and, when configured, a daily log file.
///
/// The returned guard flushes the file writer on drop and must outlive all
/// logging.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (file_layer, guard) = match logging.log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

async fn run(interface: String, config: Config) -> Result<()> {
    info!("PiRacer cluster v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut display = ConsoleDisplay::stdout();
    display.show_startup();

    let gamepad = match EvdevGamepad::open(config.controller.device(), config.controller.mapper()) {
        Ok(gamepad) => gamepad,
        Err(e) => {
            display.show_error(&e.to_string());
            return Err(e).context("Failed to initialize gamepad");
        }
    };

    let connector: Arc<dyn BusConnector> = if interface == LOOPBACK_INTERFACE {
        Arc::new(LoopbackConnector::new())
    } else {
        Arc::new(SocketCanConnector)
    };

    let mut telemetry = TelemetryReceiver::new(connector, config.bus.settings(&interface));
    match telemetry.connect().await {
        Ok(()) => telemetry
            .start_receiving()
            .context("Failed to start CAN receive loop")?,
        Err(e) => warn!("{}; continuing without telemetry", e),
    }

    let mut control = ControlLoop::new(
        Box::new(gamepad),
        Box::new(TracingActuator::new()),
        Box::new(display),
        telemetry,
    )
    .with_settings(LoopSettings::from_config(&config))
    .with_shaping(config.drive.shaping());

    info!("Press Ctrl+C to exit");

    control
        .run(shutdown_signal(tokio::signal::ctrl_c()))
        .await;

    Ok(())
}

/// Resolves when `signal` fires. A signal that cannot be installed never
/// resolves, so the loop keeps driving until the process is killed.
async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Cannot listen for Ctrl+C, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
}
