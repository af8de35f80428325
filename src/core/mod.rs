//! Core types shared by every stage of the ingest path

pub mod channel;
pub mod types;

pub use channel::{Channel, ChannelRegistry, Precision, TIMESTAMP_SUFFIX};
pub use types::{
    ClockStats, Sample, SequenceClock, ServerStamp, SortKey, TIMESTAMP_FORMAT, format_timestamp,
    parse_client_timestamp,
};
