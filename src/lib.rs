//! BioSignal IO - ingest service for a wearable physiological sensor
//!
//! A single wearable streams newline-delimited JSON over TCP. Readings are
//! cached for live display, and while recording they pass through a
//! timestamp-ordered reorder buffer into one CSV file per channel.
//!
//! ## Protocol Architecture
//!
//! - **TCP (port 8000)**: sensor frames, one JSON object per line
//! - **UDP broadcast (port 9999)**: service announcement for discovery
//!
//! ## Threads
//!
//! | Thread | Role |
//! |--------|------|
//! | `session-server` | accept loop and per-connection read loop |
//! | `dispatcher` | drains and sorts the reorder buffer every flush interval |
//! | `discovery` | periodic UDP announcement |

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod storage;
pub mod streaming;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use crate::core::{Channel, ChannelRegistry, Sample};
pub use error::{Error, Result};
pub use service::{BioHealth, BioSignalService, ServiceStatus};
pub use session::HealthEvent;
