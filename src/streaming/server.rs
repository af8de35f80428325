//! Session server: accept loop for the single wearable client
//!
//! The listener is bound by the caller and polled non-blocking, so the
//! running flag is observed within one poll tick. Only one client is served
//! at a time; a second connection waits in the listen backlog until the
//! current one ends. After every disconnect the loop goes back to accepting.

use super::tcp_receiver::{IngestContext, ReceiverSettings, TcpReceiver};
use crate::error::{Error, Result};
use crate::session::HealthEvent;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep between accept polls
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Handle to the running accept loop
pub struct SessionServer {
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl SessionServer {
    /// Spawn the accept loop on an already bound listener
    pub fn spawn(
        listener: TcpListener,
        ctx: IngestContext,
        settings: ReceiverSettings,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let handle = thread::Builder::new()
            .name("session-server".to_string())
            .spawn(move || {
                log::info!("Session server listening on {}", local_addr);
                accept_loop(&listener, &ctx, &settings, &running);
                log::info!("Session server stopped");
            })?;

        Ok(Self {
            local_addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the accept loop to exit (after the running flag clears)
    pub fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanic),
            None => Ok(()),
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    ctx: &IngestContext,
    settings: &ReceiverSettings,
    running: &Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    log::error!("Failed to set blocking mode for client {}: {}", peer, e);
                    ctx.events.publish(HealthEvent::Disconnected {
                        reason: format!("setup error: {}", e),
                    });
                    continue;
                }

                log::info!("Client connected: {}", peer);
                let handle = match stream.try_clone() {
                    Ok(clone) => Some(clone),
                    Err(e) => {
                        log::warn!("Failed to clone client socket: {}", e);
                        None
                    }
                };
                ctx.session.client_connected(peer, handle);
                ctx.events.publish(HealthEvent::ClientConnected { peer });

                let mut receiver =
                    TcpReceiver::new(ctx.clone(), settings.clone(), Arc::clone(running));
                let exit = receiver.run(stream);

                ctx.session.client_disconnected();
                log::info!("Client {} disconnected ({}), waiting for reconnection", peer, exit);
                ctx.events.publish(HealthEvent::Disconnected {
                    reason: exit.to_string(),
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::error!("Error accepting client connection: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChannelRegistry, SequenceClock};
    use crate::pipeline::ReorderBuffer;
    use crate::session::{EventBus, SessionState};
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Instant;

    fn context() -> IngestContext {
        IngestContext {
            session: Arc::new(SessionState::new()),
            clock: Arc::new(SequenceClock::new()),
            buffer: Arc::new(ReorderBuffer::new(1000)),
            events: EventBus::new(),
            registry: Arc::new(ChannelRegistry::builtin()),
        }
    }

    fn settings() -> ReceiverSettings {
        ReceiverSettings {
            read_timeout: Duration::from_millis(20),
            signal_timeout: Duration::from_secs(5),
            status_log_interval: Duration::from_secs(1),
            max_frame_bytes: 4096,
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let ctx = context();
        let events = ctx.events.subscribe();
        let running = Arc::new(AtomicBool::new(true));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut server =
            SessionServer::spawn(listener, ctx.clone(), settings(), Arc::clone(&running)).unwrap();
        let addr = server.local_addr();

        for round in 0..2 {
            let mut client = TcpStream::connect(addr).unwrap();
            assert!(wait_for(|| ctx.session.is_connected()), "round {}", round);
            client.write_all(b"{\"HR\": 70}\n").unwrap();
            drop(client);
            assert!(wait_for(|| !ctx.session.is_connected()), "round {}", round);
        }

        let mut received: Vec<HealthEvent> = Vec::new();
        assert!(wait_for(|| {
            received.extend(events.try_iter());
            received.iter().filter(|e| e.is_disconnect()).count() == 2
        }));
        assert!(matches!(received[0], HealthEvent::ClientConnected { .. }));

        running.store(false, Ordering::Relaxed);
        server.join().unwrap();
    }

    #[test]
    fn test_stop_while_client_connected() {
        let ctx = context();
        let running = Arc::new(AtomicBool::new(true));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut server =
            SessionServer::spawn(listener, ctx.clone(), settings(), Arc::clone(&running)).unwrap();

        let _client = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_for(|| ctx.session.is_connected()));

        running.store(false, Ordering::Relaxed);
        ctx.session.interrupt_client();
        server.join().unwrap();
        assert!(!ctx.session.is_connected());
    }
}
