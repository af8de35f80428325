//! BioSignal IO daemon
//!
//! Listens for the wearable on TCP, announces itself over UDP broadcast and
//! records per-channel CSV files while recording is enabled.
//!
//! ```bash
//! biosignal-io --config biosignal-io.toml --output data/case01/bio_result --record
//! ```

use biosignal_io::config::ServiceConfig;
use biosignal_io::error::{Error, Result};
use biosignal_io::{BioSignalService, HealthEvent};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "biosignal-io")]
#[command(about = "Physiological signal ingest service")]
struct Args {
    /// Path to TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,

    /// Output prefix for the channel files, e.g. data/case01/bio_result
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start recording immediately
    #[arg(long)]
    record: bool,

    /// Initial phase (Condition column)
    #[arg(long)]
    phase: Option<String>,

    /// Disable the UDP discovery broadcast
    #[arg(long)]
    no_discovery: bool,
}

fn load_config(args: &Args) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.network.bind_address = bind.clone();
    }
    if let Some(output) = &args.output {
        config.output.base_path = Some(output.clone());
    }
    if args.no_discovery {
        config.discovery.enabled = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("BioSignal IO v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        log::info!("Using config: {}", path.display());
    }

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let service = BioSignalService::new(config.clone());
    if let Some(prefix) = &config.output.base_path {
        service.configure_output(prefix)?;
    }
    let addr = service.start()?;

    if let Some(phase) = &args.phase {
        service.set_phase(phase);
    }
    if args.record {
        service.start_writing();
    }

    log::info!("Listening on {}. Press Ctrl-C to stop.", addr);

    let events = service.events();
    while running.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event @ HealthEvent::ClientConnected { .. }) => log::info!("{}", event),
            Ok(event) => log::warn!("{}", event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Shutting down...");
    service.stop_writing()?;
    service.stop()?;
    log::info!("BioSignal IO stopped");
    Ok(())
}
