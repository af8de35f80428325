//! Shared session state
//!
//! The service keeps three lock domains, and no code path ever holds more
//! than one of them:
//!
//! | Domain | Guards | Owner |
//! |--------|--------|-------|
//! | link | connection handle, connected flag, last-data clock, latest-value cache | [`SessionState`] |
//! | recorder | per-channel files, phase/context/label tags | [`crate::storage::Recorder`] |
//! | counter | server sequence number and clock | [`crate::core::SequenceClock`] |
//!
//! This module owns the link domain and the lock-free recording flag, and
//! defines [`SessionTags`], the tag set stored inside the recorder domain.

use crate::core::Channel;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Value of every tag before anything is set
pub const UNSET_TAG: &str = "None";

/// Experiment tags stamped onto every persisted row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTags {
    /// Condition column (experiment phase)
    pub phase: String,
    /// Current column (free-form context)
    pub context: String,
    /// Label column
    pub label: String,
}

impl Default for SessionTags {
    fn default() -> Self {
        Self {
            phase: UNSET_TAG.to_string(),
            context: UNSET_TAG.to_string(),
            label: UNSET_TAG.to_string(),
        }
    }
}

/// Connection-side state (link lock domain)
#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    peer: Option<SocketAddr>,
    /// Clone of the client socket so stop can interrupt a blocked read
    stream: Option<TcpStream>,
    last_data: Option<Instant>,
    latest: BTreeMap<Channel, f64>,
    present: BTreeSet<Channel>,
}

/// Point-in-time copy of the link domain
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkSnapshot {
    pub connected: bool,
    pub peer: Option<SocketAddr>,
    /// Seconds since the last sample while connected
    pub seconds_since_data: Option<f64>,
    pub latest: BTreeMap<Channel, f64>,
    pub present: BTreeSet<Channel>,
}

/// Process-wide session object shared by the server, dispatcher and
/// control interface
#[derive(Debug, Default)]
pub struct SessionState {
    link: Mutex<LinkState>,
    recording: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted client and restart the liveness clock
    pub fn client_connected(&self, peer: SocketAddr, stream: Option<TcpStream>) {
        let mut link = self.link.lock();
        link.connected = true;
        link.peer = Some(peer);
        link.stream = stream;
        link.last_data = Some(Instant::now());
        link.present.clear();
    }

    /// Clear the connection handle and connected flag
    pub fn client_disconnected(&self) {
        let mut link = self.link.lock();
        link.connected = false;
        link.peer = None;
        link.stream = None;
        link.last_data = None;
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().connected
    }

    /// Shut down the active client socket, if any, so its reader wakes up
    pub fn interrupt_client(&self) {
        let stream = self.link.lock().stream.take();
        if let Some(stream) = stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Update the latest-value cache and the liveness clock
    pub fn observe(&self, readings: &[(Channel, f64)]) {
        if readings.is_empty() {
            return;
        }
        let mut link = self.link.lock();
        for &(channel, value) in readings {
            link.latest.insert(channel, value);
            link.present.insert(channel);
        }
        link.last_data = Some(Instant::now());
    }

    /// Time since the last sample, only while a client is connected
    pub fn silence(&self) -> Option<Duration> {
        let link = self.link.lock();
        if !link.connected {
            return None;
        }
        link.last_data.map(|t| t.elapsed())
    }

    pub fn latest(&self, channel: Channel) -> Option<f64> {
        self.link.lock().latest.get(&channel).copied()
    }

    pub fn link_snapshot(&self) -> LinkSnapshot {
        let link = self.link.lock();
        LinkSnapshot {
            connected: link.connected,
            peer: link.peer,
            seconds_since_data: if link.connected {
                link.last_data.map(|t| t.elapsed().as_secs_f64())
            } else {
                None
            },
            latest: link.latest.clone(),
            present: link.present.clone(),
        }
    }

    /// Drop cached values and presence flags (session reset)
    pub fn clear_cache(&self) {
        let mut link = self.link.lock();
        link.latest.clear();
        link.present.clear();
    }

    pub fn set_recording(&self, on: bool) -> bool {
        self.recording.swap(on, Ordering::SeqCst)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.7:50123".parse().unwrap()
    }

    #[test]
    fn test_default_tags() {
        let tags = SessionTags::default();
        assert_eq!(tags.phase, "None");
        assert_eq!(tags.context, "None");
        assert_eq!(tags.label, "None");
    }

    #[test]
    fn test_connect_disconnect_cycle() {
        let state = SessionState::new();
        assert!(!state.is_connected());
        assert!(state.silence().is_none());

        state.client_connected(peer(), None);
        assert!(state.is_connected());
        assert!(state.silence().unwrap() < Duration::from_secs(1));
        assert_eq!(state.link_snapshot().peer, Some(peer()));

        state.client_disconnected();
        assert!(!state.is_connected());
        assert!(state.silence().is_none());
        assert!(state.link_snapshot().peer.is_none());
    }

    #[test]
    fn test_observe_updates_cache() {
        let state = SessionState::new();
        state.client_connected(peer(), None);
        state.observe(&[(Channel::Gsr, 45.2), (Channel::Hr, 75.0)]);
        state.observe(&[(Channel::Gsr, 46.0)]);

        assert_eq!(state.latest(Channel::Gsr), Some(46.0));
        assert_eq!(state.latest(Channel::Hr), Some(75.0));
        assert_eq!(state.latest(Channel::Skt), None);

        let snapshot = state.link_snapshot();
        assert!(snapshot.present.contains(&Channel::Gsr));
        assert!(!snapshot.present.contains(&Channel::Skt));

        state.clear_cache();
        assert_eq!(state.latest(Channel::Gsr), None);
    }

    #[test]
    fn test_latest_survives_disconnect() {
        let state = SessionState::new();
        state.client_connected(peer(), None);
        state.observe(&[(Channel::Skt, 32.5)]);
        state.client_disconnected();
        assert_eq!(state.latest(Channel::Skt), Some(32.5));
    }

    #[test]
    fn test_recording_flag() {
        let state = SessionState::new();
        assert!(!state.is_recording());
        assert!(!state.set_recording(true));
        assert!(state.is_recording());
        assert!(state.set_recording(false));
    }
}
