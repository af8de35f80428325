//! Core data types: samples, ordering keys and the server sequence clock.

use super::channel::Channel;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use parking_lot::Mutex;
use serde::Serialize;

/// Client timestamp layout: `2025-01-28 14:30:25.123`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Server timestamps are rendered with exactly three fractional digits
const SERVER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Parse a client timestamp into epoch milliseconds
///
/// The wearable formats wall-clock time without a zone, so the string is
/// read in the host's local zone. Ambiguous or skipped local times (DST
/// transitions) fall back to UTC rather than failing.
pub fn parse_client_timestamp(text: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()?;
    let millis = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.timestamp_millis(),
        None => naive.and_utc().timestamp_millis(),
    };
    Some(millis)
}

/// Render a local time in the persisted timestamp layout
pub fn format_timestamp(time: &DateTime<Local>) -> String {
    time.format(SERVER_TIMESTAMP_FORMAT).to_string()
}

/// Ordering key used by the reorder buffer
///
/// Compares by epoch milliseconds first; the server sequence breaks ties so
/// equal timestamps keep arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SortKey {
    pub epoch_ms: i64,
    pub sequence: u64,
}

/// Server-side receive stamp handed out by [`SequenceClock`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStamp {
    pub sequence: u64,
    pub epoch_ms: i64,
    pub text: String,
}

/// One physiological reading, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub channel: Channel,
    pub value: f64,
    /// Timestamp as sent by the client, if any
    pub client_timestamp: Option<String>,
    /// Receive time on this host
    pub server_timestamp: String,
    /// Strictly increasing across the service lifetime
    pub sequence: u64,
    sort_key: SortKey,
    client_ordered: bool,
}

impl Sample {
    /// Build a sample, deriving its ordering key
    ///
    /// A missing or unparsable client timestamp never drops the sample; the
    /// receive time is substituted and only ordering precision is lost.
    pub fn new(
        channel: Channel,
        value: f64,
        client_timestamp: Option<String>,
        stamp: ServerStamp,
    ) -> Self {
        let parsed = client_timestamp.as_deref().and_then(parse_client_timestamp);
        let (epoch_ms, client_ordered) = match parsed {
            Some(ms) => (ms, true),
            None => {
                if let Some(raw) = client_timestamp.as_deref() {
                    log::debug!(
                        "Unparsable {} timestamp {:?}, ordering by receive time",
                        channel,
                        raw
                    );
                }
                (stamp.epoch_ms, false)
            }
        };

        Self {
            channel,
            value,
            client_timestamp,
            server_timestamp: stamp.text,
            sequence: stamp.sequence,
            sort_key: SortKey {
                epoch_ms,
                sequence: stamp.sequence,
            },
            client_ordered,
        }
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// True when ordering uses the client's own timestamp
    pub fn is_client_ordered(&self) -> bool {
        self.client_ordered
    }

    /// Timestamp written to the Time column: client time when present,
    /// receive time otherwise
    pub fn row_timestamp(&self) -> &str {
        match self.client_timestamp.as_deref() {
            Some(ts) if !ts.is_empty() => ts,
            _ => &self.server_timestamp,
        }
    }
}

#[derive(Debug)]
struct ClockState {
    next_sequence: u64,
    started_at: DateTime<Local>,
}

/// Sequence and receive-time source (the narrow counter lock)
///
/// The lock is held only to bump the counter and read the clock, never
/// while any other lock is taken.
#[derive(Debug)]
pub struct SequenceClock {
    state: Mutex<ClockState>,
}

/// Counter statistics for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ClockStats {
    pub sequence_counter: u64,
    pub started_at: String,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                next_sequence: 0,
                started_at: Local::now(),
            }),
        }
    }

    /// Stamp a newly received reading
    pub fn stamp(&self) -> ServerStamp {
        let mut state = self.state.lock();
        let now = Local::now();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        ServerStamp {
            sequence,
            epoch_ms: now.timestamp_millis(),
            text: format_timestamp(&now),
        }
    }

    /// Restart numbering; only called when the service is (re)started
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.next_sequence = 0;
        state.started_at = Local::now();
    }

    pub fn stats(&self) -> ClockStats {
        let state = self.state.lock();
        ClockStats {
            sequence_counter: state.next_sequence,
            started_at: format_timestamp(&state.started_at),
        }
    }
}

impl Default for SequenceClock {
    fn default() -> Self {
        Self::new()
    }
}
