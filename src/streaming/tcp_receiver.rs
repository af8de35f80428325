//! Per-connection read loop for the wearable client
//!
//! # Connection Lifecycle
//!
//! ```text
//! 1. SessionServer accepts the client and hands the stream over
//! 2. Bytes are framed into lines, each line parsed into readings
//! 3. Readings update the latest-value cache; while recording they are
//!    stamped and pushed into the reorder buffer
//! 4. Every read timeout runs the liveness check (signal lost)
//! 5. Graceful close or a socket error ends the loop
//! ```
//!
//! Protocol errors never end the connection: a malformed line is logged and
//! the next line is processed as usual.

use super::frame::{LineFramer, Reading, parse_frame};
use crate::config::ServiceConfig;
use crate::core::{Channel, ChannelRegistry, Sample, SequenceClock};
use crate::pipeline::ReorderBuffer;
use crate::session::{EventBus, HealthEvent, SessionState};
use std::fmt;
use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Socket read chunk size
const READ_CHUNK: usize = 1024;

/// Shared handles the ingest path writes into
#[derive(Clone)]
pub struct IngestContext {
    pub session: Arc<SessionState>,
    pub clock: Arc<SequenceClock>,
    pub buffer: Arc<ReorderBuffer>,
    pub events: EventBus,
    pub registry: Arc<ChannelRegistry>,
}

/// Timing and size limits for one connection
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub read_timeout: Duration,
    pub signal_timeout: Duration,
    pub status_log_interval: Duration,
    pub max_frame_bytes: usize,
}

impl ReceiverSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            read_timeout: config.network.read_timeout(),
            signal_timeout: config.health.signal_timeout(),
            status_log_interval: config.health.status_log_interval(),
            max_frame_bytes: config.network.max_frame_bytes,
        }
    }
}

/// Why the read loop ended
#[derive(Debug)]
pub enum ReceiverExit {
    /// Peer closed the connection
    Closed,
    /// Socket-level failure
    Failed(io::Error),
    /// Service is shutting down
    Stopped,
}

impl fmt::Display for ReceiverExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverExit::Closed => write!(f, "closed by peer"),
            ReceiverExit::Failed(e) => write!(f, "connection error: {}", e),
            ReceiverExit::Stopped => write!(f, "server stopping"),
        }
    }
}

/// Reads frames from one connected client
pub struct TcpReceiver {
    ctx: IngestContext,
    settings: ReceiverSettings,
    /// Global running flag (service stop)
    running: Arc<AtomicBool>,
    framer: LineFramer,
    last_status_log: Instant,
    frames: u64,
    rejected: u64,
}

impl TcpReceiver {
    pub fn new(ctx: IngestContext, settings: ReceiverSettings, running: Arc<AtomicBool>) -> Self {
        let framer = LineFramer::new(settings.max_frame_bytes);
        Self {
            ctx,
            settings,
            running,
            framer,
            last_status_log: Instant::now(),
            frames: 0,
            rejected: 0,
        }
    }

    /// Run until the client goes away or the service stops
    pub fn run(&mut self, mut stream: TcpStream) -> ReceiverExit {
        log::debug!("Receiver started for {:?}", stream.peer_addr());

        // Timeout lets the loop observe the running flag and check liveness
        if let Err(e) = stream.set_read_timeout(Some(self.settings.read_timeout)) {
            log::warn!("Failed to set read timeout: {}", e);
        }

        let mut chunk = [0u8; READ_CHUNK];
        let exit = loop {
            if !self.running.load(Ordering::Relaxed) {
                break ReceiverExit::Stopped;
            }

            match stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break ReceiverExit::Stopped;
                    }
                    break ReceiverExit::Closed;
                }
                Ok(n) => {
                    for line in self.framer.push(&chunk[..n]) {
                        self.handle_line(&line);
                    }
                    self.check_liveness();
                    self.log_status();
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    self.check_liveness();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break ReceiverExit::Stopped;
                    }
                    break ReceiverExit::Failed(e);
                }
            }
        };

        let _ = stream.shutdown(std::net::Shutdown::Both);
        log::info!(
            "Receiver finished: {} ({} frames, {} rejected)",
            exit,
            self.frames,
            self.rejected
        );
        exit
    }

    fn handle_line(&mut self, line: &str) {
        let readings = match parse_frame(line, &self.ctx.registry) {
            Ok(readings) => readings,
            Err(e) => {
                self.rejected += 1;
                log::warn!("Invalid frame, skipping: {}", e);
                return;
            }
        };
        self.frames += 1;
        if readings.is_empty() {
            return;
        }

        let values: Vec<(Channel, f64)> = readings.iter().map(|r| (r.channel, r.value)).collect();
        self.ctx.session.observe(&values);

        if self.ctx.session.is_recording() {
            for reading in readings {
                self.enqueue(reading);
            }
        }
    }

    fn enqueue(&self, reading: Reading) {
        let stamp = self.ctx.clock.stamp();
        let sample = Sample::new(
            reading.channel,
            reading.value,
            reading.client_timestamp,
            stamp,
        );
        log::trace!(
            "Queued {} #{} = {}",
            sample.channel,
            sample.sequence,
            sample.value
        );
        self.ctx.buffer.push(sample);
    }

    /// Raise "signal lost" on every check past the window, not just once
    fn check_liveness(&self) {
        if let Some(silence) = self.ctx.session.silence()
            && silence > self.settings.signal_timeout
        {
            log::warn!(
                "No physiological signals received for {:.1}s",
                silence.as_secs_f64()
            );
            self.ctx.events.publish(HealthEvent::SignalLost { silence });
        }
    }

    /// Live one-line summary of the latest value per channel
    fn log_status(&mut self) {
        if self.last_status_log.elapsed() < self.settings.status_log_interval {
            return;
        }
        self.last_status_log = Instant::now();

        let latest = self.ctx.session.link_snapshot().latest;
        if latest.is_empty() {
            return;
        }
        let line = latest
            .iter()
            .map(|(channel, value)| format!("{}: {}", channel, channel.format_value(*value)))
            .collect::<Vec<_>>()
            .join(", ");
        log::info!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    fn context() -> IngestContext {
        IngestContext {
            session: Arc::new(SessionState::new()),
            clock: Arc::new(SequenceClock::new()),
            buffer: Arc::new(ReorderBuffer::new(1000)),
            events: EventBus::new(),
            registry: Arc::new(ChannelRegistry::builtin()),
        }
    }

    fn settings(signal_timeout_ms: u64) -> ReceiverSettings {
        ReceiverSettings {
            read_timeout: Duration::from_millis(20),
            signal_timeout: Duration::from_millis(signal_timeout_ms),
            status_log_interval: Duration::from_secs(1),
            max_frame_bytes: 4096,
        }
    }

    /// Accept one loopback connection and run a receiver over it
    fn spawn_receiver(
        ctx: IngestContext,
        settings: ReceiverSettings,
        running: Arc<AtomicBool>,
    ) -> (TcpStream, thread::JoinHandle<ReceiverExit>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        ctx.session.client_connected(peer, None);
        let handle = thread::spawn(move || {
            TcpReceiver::new(ctx, settings, running).run(server_side)
        });
        (client, handle)
    }

    #[test]
    fn test_frames_queued_while_recording() {
        let ctx = context();
        ctx.session.set_recording(true);
        let running = Arc::new(AtomicBool::new(true));
        let (mut client, handle) = spawn_receiver(ctx.clone(), settings(5000), running);

        client
            .write_all(
                b"{\"GSR\": 45.2, \"GSR_Timestamp\": \"2025-01-28 14:30:25.100\"}\n\
                  not json at all\n\
                  {\"GSR\": 46.0, \"GSR_Timestamp\": \"2025-01-28 14:30:25.050\"}\n",
            )
            .unwrap();
        drop(client);

        let exit = handle.join().unwrap();
        assert!(matches!(exit, ReceiverExit::Closed));

        let batch = ctx.buffer.drain_sorted();
        let values: Vec<f64> = batch.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![46.0, 45.2]);
        assert_eq!(ctx.session.latest(Channel::Gsr), Some(46.0));
    }

    #[test]
    fn test_watch_only_when_not_recording() {
        let ctx = context();
        let running = Arc::new(AtomicBool::new(true));
        let (mut client, handle) = spawn_receiver(ctx.clone(), settings(5000), running);

        client.write_all(b"{\"HR\": 72}\n").unwrap();
        drop(client);
        handle.join().unwrap();

        assert!(ctx.buffer.is_empty());
        assert_eq!(ctx.session.latest(Channel::Hr), Some(72.0));
        assert_eq!(ctx.clock.stats().sequence_counter, 0);
    }

    #[test]
    fn test_signal_lost_is_repeated() {
        let ctx = context();
        let events = ctx.events.subscribe();
        let running = Arc::new(AtomicBool::new(true));
        let started = Instant::now();
        let (client, handle) = spawn_receiver(ctx.clone(), settings(30), Arc::clone(&running));

        thread::sleep(Duration::from_millis(200));
        let lost = events.try_iter().filter(HealthEvent::is_signal_lost).count() as u128;
        let elapsed = started.elapsed();
        assert!(lost >= 2, "expected repeated signal-lost events, got {}", lost);
        // At most one per 20 ms read timeout
        assert!(
            lost <= elapsed.as_millis() / 20 + 1,
            "{} signal-lost events in {:?}",
            lost,
            elapsed
        );

        running.store(false, Ordering::Relaxed);
        assert!(matches!(handle.join().unwrap(), ReceiverExit::Stopped));
        drop(client);
    }
}
