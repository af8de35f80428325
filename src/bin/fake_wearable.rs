//! Wearable simulator
//!
//! Finds the service through its UDP announcement (or `--host`), connects
//! and streams synthetic readings with client timestamps.
//!
//! ```bash
//! fake-wearable --frames 600 --interval-ms 50 --swap-every 10
//! ```

use biosignal_io::core::format_timestamp;
use biosignal_io::error::{Error, Result};
use biosignal_io::streaming::discover_service;
use chrono::Local;
use clap::Parser;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fake-wearable")]
#[command(about = "Stream synthetic physiological readings to a BioSignal IO server")]
struct Args {
    /// Server host; discovered over UDP when omitted
    #[arg(long)]
    host: Option<String>,

    /// Server TCP port (with --host)
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// UDP port the server announces on
    #[arg(long, default_value_t = 9999)]
    discovery_port: u16,

    /// How long to wait for an announcement
    #[arg(long, default_value_t = 10_000)]
    discover_timeout_ms: u64,

    /// Number of frames to send
    #[arg(short, long, default_value_t = 300)]
    frames: u64,

    /// Delay between frames
    #[arg(short, long, default_value_t = 100)]
    interval_ms: u64,

    /// Send every Nth frame after its successor (0 disables)
    #[arg(long, default_value_t = 0)]
    swap_every: u64,
}

fn resolve_server(args: &Args) -> Result<SocketAddr> {
    if let Some(host) = &args.host {
        return (host.as_str(), args.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::InvalidParameter(format!("cannot resolve {}", host)));
    }

    log::info!(
        "Waiting for server announcement on UDP port {}",
        args.discovery_port
    );
    let announcement = discover_service(
        args.discovery_port,
        Duration::from_millis(args.discover_timeout_ms),
    )?
    .ok_or_else(|| Error::Other("no server announcement received".to_string()))?;
    log::info!("Found {} at {}:{}", announcement.service, announcement.ip, announcement.tcp_port);
    announcement.tcp_addr()
}

/// One frame of synthetic readings at step `i`
fn synth_frame(i: u64) -> String {
    let t = i as f64 * 0.1;
    let stamp = format_timestamp(&Local::now());
    let readings = [
        ("GSR", 4.5 + 0.3 * (t * 0.2).sin()),
        ("HR", (72.0 + 6.0 * (t * 0.05).sin()).round()),
        ("SKT", 32.4 + 0.2 * (t * 0.01).sin()),
        ("PPGRAW", 2048.0 + 400.0 * (t * 7.5).sin()),
        ("PPI", (830.0 + 40.0 * (t * 0.05).cos()).round()),
        ("ACT", (i % 4) as f64),
        ("IMUX", 0.01 * (t * 1.3).sin()),
        ("IMUY", 0.01 * (t * 1.7).cos()),
        ("IMUZ", 0.98 + 0.01 * (t * 0.9).sin()),
    ];

    let mut frame = Map::new();
    for (name, value) in readings {
        frame.insert(name.to_string(), json!(value));
        frame.insert(format!("{}_Timestamp", name), json!(stamp));
    }
    Value::Object(frame).to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let server = resolve_server(&args)?;
    let mut stream = TcpStream::connect(server)?;
    stream.set_nodelay(true)?;
    log::info!("Connected to {}", server);

    let interval = Duration::from_millis(args.interval_ms);
    let mut held: Option<String> = None;
    for i in 0..args.frames {
        let line = synth_frame(i);
        if args.swap_every > 0 && i % args.swap_every == 0 && i + 1 < args.frames {
            held = Some(line);
        } else {
            stream.write_all(line.as_bytes())?;
            stream.write_all(b"\n")?;
            if let Some(late) = held.take() {
                stream.write_all(late.as_bytes())?;
                stream.write_all(b"\n")?;
            }
        }
        if (i + 1) % 100 == 0 {
            log::info!("Sent {} frames", i + 1);
        }
        thread::sleep(interval);
    }

    log::info!("Done, sent {} frames", args.frames);
    Ok(())
}
