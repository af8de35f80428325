//! Label event log
//!
//! A standalone CSV next to the channel files recording every label
//! transition with its own wall-clock stamp, so phases can be rebuilt even
//! when per-channel client timestamps drift.
//!
//! ```text
//! Timestamp,Event Type,Label
//! 1738045825.123456,LABEL_CHANGE,music1
//! ```

use super::csv_field;
use crate::error::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header of the event log
pub const EVENT_LOG_HEADER: &str = "Timestamp,Event Type,Label";

/// Event type written by [`EventLog::mark_label`]
pub const LABEL_CHANGE: &str = "LABEL_CHANGE";

/// Append-only event log file
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Event log living beside the channel files of `prefix`
    pub fn beside(prefix: &Path, file_name: &str) -> Self {
        Self::new(prefix.with_file_name(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a `LABEL_CHANGE` row stamped with the current epoch time
    pub fn mark_label(&self, label: &str) -> Result<()> {
        let micros = Utc::now().timestamp_micros();
        let seconds = micros as f64 / 1_000_000.0;
        self.append(&format!("{:.6}", seconds), LABEL_CHANGE, label)
    }

    /// Append one row, creating the file (and header) on first use
    pub fn append(&self, timestamp: &str, event_type: &str, label: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut text = String::new();
        if file.metadata()?.len() == 0 {
            text.push_str(EVENT_LOG_HEADER);
            text.push('\n');
        }
        text.push_str(&format!(
            "{},{},{}\n",
            csv_field(timestamp),
            csv_field(event_type),
            csv_field(label)
        ));
        // Single write keeps a row intact if two callers race
        file.write_all(text.as_bytes())?;
        file.flush()?;

        log::info!("Event logged: {} {}", event_type, label);
        Ok(())
    }
}
