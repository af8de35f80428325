//! Control interface for the ingest service
//!
//! [`BioSignalService`] owns the shared state and the worker threads
//! (session server, dispatcher, discovery broadcaster). Every method takes
//! `&self` and may be called from any thread.
//!
//! Besides the three data lock domains (link, recorder, counter) the service
//! has two control locks. The lifecycle guard serialises start and stop, and
//! stop holds it until the threads are joined and the files are closed. The
//! runtime slot only guards the handle of the running threads, so status
//! queries never wait on a stop in progress.

use crate::config::ServiceConfig;
use crate::core::{Channel, ChannelRegistry, ClockStats, SequenceClock};
use crate::error::{Error, Result};
use crate::pipeline::{Dispatcher, ReorderBuffer, SampleSink};
use crate::session::{EventBus, HealthEvent, LinkSnapshot, SessionState, SessionTags};
use crate::storage::{EventLog, Recorder};
use crate::streaming::{
    DiscoveryBroadcaster, IngestContext, ReceiverSettings, SessionServer, local_ip,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sensor health verdict, compatible with the wearable app's status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BioHealth {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: &'static str,
}

impl BioHealth {
    pub const SUCCESS: BioHealth = BioHealth {
        status_code: 200,
        message: "success",
    };
    pub const GSR_ERROR: BioHealth = BioHealth {
        status_code: 100,
        message: "gsrError",
    };
    pub const SKT_ERROR: BioHealth = BioHealth {
        status_code: 101,
        message: "sktError",
    };
    pub const HR_ERROR: BioHealth = BioHealth {
        status_code: 102,
        message: "hrError",
    };

    /// First missing channel wins, checked GSR, SKT, HR
    pub fn evaluate(present: &BTreeSet<Channel>) -> Self {
        if !present.contains(&Channel::Gsr) {
            Self::GSR_ERROR
        } else if !present.contains(&Channel::Skt) {
            Self::SKT_ERROR
        } else if !present.contains(&Channel::Hr) {
            Self::HR_ERROR
        } else {
            Self::SUCCESS
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == Self::SUCCESS.status_code
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryInfo {
    pub broadcast_port: u16,
    pub tcp_port: Option<u16>,
    pub local_ip: String,
    pub broadcasting: bool,
}

/// Point-in-time view returned by [`BioSignalService::get_status`]
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub listen_addr: Option<SocketAddr>,
    pub recording: bool,
    pub output_prefix: Option<PathBuf>,
    pub link: LinkSnapshot,
    pub health: BioHealth,
    pub tags: SessionTags,
    pub clock: ClockStats,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub dropped: u64,
    /// Samples ordered by receive time for lack of a client timestamp
    pub receive_ordered: u64,
    pub rows_written: u64,
    pub discovery: DiscoveryInfo,
}

/// Threads alive between start and stop
struct Runtime {
    running: Arc<AtomicBool>,
    server: SessionServer,
    dispatcher: Dispatcher,
    broadcaster: Option<DiscoveryBroadcaster>,
}

/// Physiological signal ingest service
pub struct BioSignalService {
    config: ServiceConfig,
    registry: Arc<ChannelRegistry>,
    session: Arc<SessionState>,
    recorder: Arc<Recorder>,
    clock: Arc<SequenceClock>,
    buffer: Arc<ReorderBuffer>,
    events: EventBus,
    lifecycle: Mutex<()>,
    runtime: Mutex<Option<Runtime>>,
}

impl BioSignalService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_registry(config, ChannelRegistry::builtin())
    }

    /// Service recognising the frame keys in `registry`
    pub fn with_registry(config: ServiceConfig, registry: ChannelRegistry) -> Self {
        let buffer = Arc::new(ReorderBuffer::new(config.dispatch.max_buffered));
        Self {
            config,
            registry: Arc::new(registry),
            session: Arc::new(SessionState::new()),
            recorder: Arc::new(Recorder::new()),
            clock: Arc::new(SequenceClock::new()),
            buffer,
            events: EventBus::new(),
            lifecycle: Mutex::new(()),
            runtime: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Open the per-channel files under `base_path`
    ///
    /// `data/case01/bio_result` produces `data/case01/bio_result_gsr.csv`
    /// and so on.
    pub fn configure_output(&self, base_path: impl AsRef<Path>) -> Result<()> {
        self.recorder.open(base_path.as_ref())
    }

    /// Start on the configured bind address
    pub fn start(&self) -> Result<SocketAddr> {
        let addr: SocketAddr = self.config.network.bind_address.parse()?;
        self.start_on(&addr.ip().to_string(), addr.port())
    }

    /// Bind the listener and spawn the worker threads
    ///
    /// Calling it while running is a no-op returning the current address.
    /// A start racing a stop waits for the stop to finish. Port 0 picks an
    /// ephemeral port.
    pub fn start_on(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let _lifecycle = self.lifecycle.lock();
        if let Some(addr) = self.local_addr() {
            log::info!("Service already running");
            return Ok(addr);
        }

        let listener = TcpListener::bind((host, port))
            .map_err(|e| Error::Other(format!("Failed to bind to {}:{}: {}", host, port, e)))?;

        if let Some(prefix) = self.recorder.prefix()
            && !self.recorder.is_open()
        {
            self.recorder.open(&prefix)?;
        }
        self.clock.reset();
        self.buffer.clear();

        let running = Arc::new(AtomicBool::new(true));
        let sink: Arc<dyn SampleSink> = self.recorder.clone();
        let mut dispatcher = Dispatcher::spawn(
            Arc::clone(&self.buffer),
            sink,
            Arc::clone(&running),
            &self.config.dispatch,
        )?;

        let ctx = IngestContext {
            session: Arc::clone(&self.session),
            clock: Arc::clone(&self.clock),
            buffer: Arc::clone(&self.buffer),
            events: self.events.clone(),
            registry: Arc::clone(&self.registry),
        };
        let settings = ReceiverSettings::from_config(&self.config);
        let server = match SessionServer::spawn(listener, ctx, settings, Arc::clone(&running)) {
            Ok(server) => server,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                let _ = dispatcher.join();
                return Err(e);
            }
        };
        let local_addr = server.local_addr();

        let broadcaster = if self.config.discovery.enabled {
            let mut broadcaster =
                DiscoveryBroadcaster::new(self.config.discovery.clone(), local_addr.port());
            match broadcaster.start() {
                Ok(()) => Some(broadcaster),
                Err(e) => {
                    log::warn!("Discovery broadcast unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Service started on {}", local_addr);
        *self.runtime.lock() = Some(Runtime {
            running,
            server,
            dispatcher,
            broadcaster,
        });
        Ok(local_addr)
    }

    /// Stop every thread and close the channel files; safe to repeat
    ///
    /// Buffered samples are written by the dispatcher's final drain before
    /// the files close.
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let Some(mut runtime) = self.runtime.lock().take() else {
            return Ok(());
        };
        log::info!("Stopping service");

        runtime.running.store(false, Ordering::SeqCst);
        if let Some(broadcaster) = runtime.broadcaster.as_mut() {
            broadcaster.stop();
        }
        self.session.interrupt_client();

        let server = runtime.server.join();
        let dispatcher = runtime.dispatcher.join();
        self.session.set_recording(false);
        let closed = self.recorder.close();

        server?;
        dispatcher?;
        closed?;
        log::info!("Service stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime
            .lock()
            .as_ref()
            .map(|runtime| runtime.server.local_addr())
    }

    /// Begin forwarding parsed samples to the reorder buffer
    pub fn start_writing(&self) {
        if !self.recorder.is_open() {
            log::warn!("Recording started without configured output; samples will be discarded");
        }
        if !self.session.set_recording(true) {
            log::info!("Recording started");
        }
    }

    /// Stop forwarding samples and flush every open stream
    pub fn stop_writing(&self) -> Result<()> {
        if self.session.set_recording(false) {
            log::info!("Recording stopped");
        }
        self.recorder.flush_all()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_recording()
    }

    /// Condition column for subsequent rows
    pub fn set_phase(&self, phase: &str) {
        log::debug!("Phase set to {}", phase);
        self.recorder.set_phase(phase);
    }

    /// Current column for subsequent rows
    pub fn set_context(&self, context: &str) {
        log::debug!("Context set to {}", context);
        self.recorder.set_context(context);
    }

    /// Label column for subsequent rows
    pub fn set_label(&self, label: &str) {
        log::debug!("Label set to {}", label);
        self.recorder.set_label(label);
    }

    pub fn tags(&self) -> SessionTags {
        self.recorder.tags()
    }

    /// Append a `LABEL_CHANGE` row to the event log beside the channel files
    pub fn mark_label_event(&self, label: &str) -> Result<()> {
        let prefix = self.recorder.prefix().ok_or(Error::OutputNotConfigured)?;
        let event_log = EventLog::beside(&prefix, &self.config.output.event_log_name);
        event_log.mark_label(label)?;
        log::info!("Marked label change: {}", label);
        Ok(())
    }

    /// Reset tags and the latest-value cache; the sequence counter is kept
    pub fn reset_session(&self) {
        self.recorder.reset_tags();
        self.session.clear_cache();
        log::info!("Session reset");
    }

    /// Channel presence verdict
    pub fn health(&self) -> BioHealth {
        BioHealth::evaluate(&self.session.link_snapshot().present)
    }

    pub fn latest(&self, channel: Channel) -> Option<f64> {
        self.session.latest(channel)
    }

    /// Health notifications (client connected, disconnected, signal lost)
    pub fn events(&self) -> Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn get_status(&self) -> ServiceStatus {
        let (listen_addr, broadcasting) = {
            let slot = self.runtime.lock();
            match slot.as_ref() {
                Some(runtime) => (
                    Some(runtime.server.local_addr()),
                    runtime
                        .broadcaster
                        .as_ref()
                        .is_some_and(DiscoveryBroadcaster::is_broadcasting),
                ),
                None => (None, false),
            }
        };

        let link = self.session.link_snapshot();
        let health = BioHealth::evaluate(&link.present);
        ServiceStatus {
            running: listen_addr.is_some(),
            listen_addr,
            recording: self.session.is_recording(),
            output_prefix: self.recorder.prefix(),
            link,
            health,
            tags: self.recorder.tags(),
            clock: self.clock.stats(),
            buffered: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            dropped: self.buffer.dropped(),
            receive_ordered: self.buffer.receive_ordered(),
            rows_written: self.recorder.rows_written(),
            discovery: DiscoveryInfo {
                broadcast_port: self.config.discovery.port,
                tcp_port: listen_addr.map(|a| a.port()),
                local_ip: local_ip().to_string(),
                broadcasting,
            },
        }
    }

    /// Configure, start and record in one call
    ///
    /// Output and listener are only set up if the service is not already
    /// running; phase and context are always applied.
    pub fn begin_collection(
        &self,
        base_path: impl AsRef<Path>,
        phase: &str,
        context: &str,
        host: &str,
        port: u16,
    ) -> Result<SocketAddr> {
        let addr = match self.local_addr() {
            Some(addr) => addr,
            None => {
                self.configure_output(base_path)?;
                self.start_on(host, port)?
            }
        };
        self.set_phase(phase);
        self.set_context(context);
        self.start_writing();
        Ok(addr)
    }

    /// Stop recording, then stop the service
    pub fn end_collection(&self) -> Result<()> {
        let flushed = self.stop_writing();
        self.stop()?;
        flushed
    }
}

impl Drop for BioSignalService {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Error stopping service: {}", e);
        }
    }
}
