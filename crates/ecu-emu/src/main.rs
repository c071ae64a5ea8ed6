//! ECU emulator
//!
//! Emulates an engine and a transmission controller answering OBD-II and UDS
//! requests over ISO-TP on a SocketCAN interface.
//!
//! # Usage
//!
//! ```bash
//! ./ecu-emu --interface vcan0
//! ./ecu-emu --config config/ecu-emu.toml --log-frames --export state.json
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ecu_emu_core::{AddressingMode, ConfigRecord, Emulator, EmulatorSnapshot, MonotonicClock};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

mod port;

use port::SocketCanPort;

/// Period of the live-parameter simulation.
const SIMULATION_TICK: Duration = Duration::from_millis(100);

/// Pause between polls while the bus is idle, taken without the emulator lock.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// How long shutdown waits for each background task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "ecu-emu")]
#[command(about = "Multi-ECU OBD-II / UDS emulator for SocketCAN")]
struct Args {
    /// Configuration file (TOML, or JSON/YAML by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CAN interface name, overrides the configuration
    #[arg(short, long)]
    interface: Option<String>,

    /// Addressing mode: obd11, uds29, hybrid or autodetect
    #[arg(short, long)]
    mode: Option<AddressingMode>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log every raw CAN frame
    #[arg(long)]
    log_frames: bool,

    /// Write the final state as JSON on shutdown
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let default_filter = if args.verbose {
        "ecu_emu=debug,ecu_emu_core=debug"
    } else {
        "ecu_emu=info,ecu_emu_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            ConfigRecord::load_any(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => ConfigRecord::default(),
    };
    if let Some(interface) = &args.interface {
        config.transport.interface = interface.clone();
    }
    if let Some(mode) = args.mode {
        config.transport.mode = mode;
    }
    if args.log_frames {
        config.logging.can_frames = true;
    }

    info!("Starting ECU emulator");
    info!(
        interface = %config.transport.interface,
        mode = %config.transport.mode,
        bitrate = config.transport.bitrate,
        ecus = config.ecus.len()
    );
    if config.transport.mode == AddressingMode::Autodetect {
        info!("Autodetect: bitrate is left to the interface setup, both id formats accepted");
    }

    let port = SocketCanPort::open(&config.transport.interface)
        .with_context(|| format!("Failed to open {}", config.transport.interface))?;

    // The port must not wait while the poll loop holds the emulator lock.
    let mut emulator = Emulator::new(&config, Box::new(port), Box::new(MonotonicClock::new()))
        .with_receive_timeout(Duration::ZERO);
    emulator.add_observer(Box::new(|snapshot: &EmulatorSnapshot| {
        match serde_json::to_string(snapshot) {
            Ok(json) => trace!(snapshot = %json, "State changed"),
            Err(e) => error!(error = %e, "Snapshot serialisation failed"),
        }
    }));

    let emulator = Arc::new(Mutex::new(emulator));
    let running = Arc::new(AtomicBool::new(true));

    // Simulation tick
    let emulator_for_sim = emulator.clone();
    let running_for_sim = running.clone();
    let sim_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SIMULATION_TICK);
        while running_for_sim.load(Ordering::SeqCst) {
            interval.tick().await;
            emulator_for_sim.lock().tick_simulation();
        }
    });

    // Main poll loop
    let emulator_for_poll = emulator.clone();
    let running_for_poll = running.clone();
    let poll_handle: JoinHandle<()> = tokio::task::spawn_blocking(move || {
        while running_for_poll.load(Ordering::SeqCst) {
            let result = emulator_for_poll.lock().poll();
            match result {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(IDLE_WAIT),
                Err(e) => {
                    error!(error = %e, "CAN read error");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    });

    info!("ECU emulator ready - waiting for requests");
    info!("Press Ctrl+C to stop");

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    running.store(false, Ordering::SeqCst);

    join_task("simulation", sim_handle).await;
    join_task("poll loop", poll_handle).await;

    if let Some(path) = &args.export {
        let json = emulator.lock().export_state().to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("State exported to {}", path.display());
    }

    info!("ECU emulator stopped");
    Ok(())
}

/// Wait for a background task to finish, logging a panic or a timeout.
async fn join_task(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
        Err(_) => warn!(task = name, "Background task did not stop in time"),
    }
}
