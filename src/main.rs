//! # Grove Link
//!
//! Headless host for the Grove cursor controller.
//!
//! Opens the link to the board (or to the simulated board), keeps it alive with
//! heartbeats and reports the telemetry snapshot the way a drawing surface
//! would consume it: polled once per frame, never blocking on I/O.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::time::{interval, Duration, Instant};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use grove_link::config::{Config, LoggingConfig};
use grove_link::protocol::TelemetrySample;
use grove_link::serial::{self, Endpoint};
use grove_link::session::Session;
use grove_link::store::LinkStatus;

/// Consumer frame rate in Hz
const FRAME_RATE_HZ: u64 = 60;

/// Frames between status reports (twice per second at 60Hz)
const REPORT_INTERVAL_FRAMES: u64 = 30;

/// Simulated button press period in simulation mode
const SIM_BUTTON_PERIOD: Duration = Duration::from_secs(3);

/// Default configuration file
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(name = "grove-link", version, about = "Host link for the Grove cursor controller")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides the configuration file
    #[arg(short, long)]
    port: Option<String>,

    /// Use the simulated board instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Report status as JSON lines
    #[arg(long)]
    json: bool,
}

/// One status report line
#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    timestamp: String,
    status: String,
    mode: &'a str,
    connected: bool,
    sample: Option<TelemetrySample>,
    last_error: Option<&'a str>,
    heartbeats_sent: u64,
    lines_received: u64,
    malformed_frames: u64,
}

/// Main entry point for Grove Link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse the command line and load the configuration
///    - Set up logging (console, plus a daily file if configured)
///    - Select the endpoint and start the link
///
/// 2. **Main Loop** (60Hz)
///    - Read the telemetry snapshot
///    - Report status twice per second
///    - Press the simulated button every 3s in simulation mode
///    - Leave when the grace period expires or on Ctrl+C
///
/// 3. **Shutdown**
///    - Stop the link and release the port
///
/// # Errors
///
/// Returns error if the configuration is invalid or the port cannot be opened.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.port.clone() {
        config.serial.port = port;
    }
    let _log_guard = init_logging(&config.logging)?;

    info!("Grove Link v{} starting...", env!("CARGO_PKG_VERSION"));

    if cli.list_ports {
        let ports = serial::list_ports().context("Failed to enumerate serial ports")?;
        if ports.is_empty() {
            println!("No ports found! Check USB cable.");
        }
        for port in ports {
            println!("{:<20} {}", port.name, port.description);
        }
        return Ok(());
    }

    let mut session = Session::new(config.clone());
    let endpoint = if cli.simulate {
        Endpoint::simulated()
    } else {
        session.configured_endpoint()
    };

    session
        .select(Some(endpoint.clone()))
        .await
        .with_context(|| format!("Failed to start link on {}", endpoint))?;

    info!("Press Ctrl+C to exit");

    let mut frame = interval(Duration::from_micros(1_000_000 / FRAME_RATE_HZ));
    let mut frame_count: u64 = 0;
    let mut last_press = Instant::now();

    loop {
        tokio::select! {
            _ = frame.tick() => {
                frame_count += 1;

                if let Some(exit) = session.poll().await {
                    warn!("Link on {} ended: {}", endpoint.name(), exit);
                    break;
                }

                if let Some(controls) = session.peer_controls() {
                    if last_press.elapsed() >= SIM_BUTTON_PERIOD {
                        controls.press_button();
                        last_press = Instant::now();
                    }
                }

                if frame_count % REPORT_INTERVAL_FRAMES == 0 {
                    report(&session.status(), cli.json)?;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                if let Some(exit) = session.stop().await {
                    info!("Link {}", exit);
                }
                break;
            }
        }
    }

    Ok(())
}

/// Load the configuration, falling back to defaults if the default file is absent
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path.as_os_str() == DEFAULT_CONFIG_PATH {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Install the tracing subscriber
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log filter")?;

    if logging.directory.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&logging.directory, "grove-link.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(Some(guard))
}

fn report(status: &LinkStatus, json: bool) -> Result<()> {
    let text = status.describe(Instant::now());

    if json {
        let line = StatusReport {
            timestamp: Local::now().to_rfc3339(),
            status: text,
            mode: status.mode.display_name(),
            connected: status.connected,
            sample: status.last_sample,
            last_error: status.last_error.as_deref(),
            heartbeats_sent: status.heartbeats_sent,
            lines_received: status.lines_received,
            malformed_frames: status.malformed_frames,
        };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }

    match &status.last_sample {
        Some(sample) => {
            let (x, y, z) = sample.accel;
            println!(
                "Status: {} | Mode: {} | Potentiometer: {} | Accelerometer: X:{:.2} Y:{:.2} Z:{:.2}",
                text,
                status.mode.display_name(),
                sample.pot,
                x,
                y,
                z
            );
        }
        None => println!("Status: {}", text),
    }
    Ok(())
}
