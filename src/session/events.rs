//! Health notifications raised by the session server.
//!
//! Events travel over a bounded crossbeam channel so the server thread never
//! blocks on a slow (or absent) consumer. When the queue is full the oldest
//! event is discarded to make room for the newest.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Queued events kept for consumers
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Link health notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum HealthEvent {
    /// A client was accepted
    ClientConnected { peer: SocketAddr },
    /// The client went away (graceful close, socket error, or setup failure)
    Disconnected { reason: String },
    /// The link is up but no sample arrived within the timeout window
    SignalLost { silence: Duration },
}

impl HealthEvent {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, HealthEvent::Disconnected { .. })
    }

    pub fn is_signal_lost(&self) -> bool {
        matches!(self, HealthEvent::SignalLost { .. })
    }
}

impl fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthEvent::ClientConnected { peer } => write!(f, "Client connected: {}", peer),
            HealthEvent::Disconnected { reason } => write!(f, "Client disconnected: {}", reason),
            HealthEvent::SignalLost { silence } => write!(
                f,
                "No physiological signals received for {:.1}s",
                silence.as_secs_f64()
            ),
        }
    }
}

/// Fan-in point for health events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<HealthEvent>,
    rx: Receiver<HealthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self { tx, rx }
    }

    /// Publish without blocking, evicting the oldest queued event if full
    pub fn publish(&self, event: HealthEvent) {
        log::debug!("Health event: {}", event);
        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.rx.try_recv();
                    pending = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Consumer handle; clones share one queue
    pub fn subscribe(&self) -> Receiver<HealthEvent> {
        self.rx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_receive() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(HealthEvent::Disconnected {
            reason: "closed".to_string(),
        });
        let event = rx.try_recv().unwrap();
        assert!(event.is_disconnect());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        for i in 0..(EVENT_QUEUE_CAPACITY as u64 + 10) {
            bus.publish(HealthEvent::SignalLost {
                silence: Duration::from_secs(i),
            });
        }
        assert_eq!(rx.len(), EVENT_QUEUE_CAPACITY);
        assert_eq!(
            rx.try_recv().unwrap(),
            HealthEvent::SignalLost {
                silence: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn test_display_messages() {
        let event = HealthEvent::SignalLost {
            silence: Duration::from_millis(5200),
        };
        assert_eq!(
            event.to_string(),
            "No physiological signals received for 5.2s"
        );
        assert!(event.is_signal_lost());
    }
}
