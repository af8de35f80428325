//! Per-channel CSV persistence
//!
//! One append-only file per channel, `<prefix>_<channel>.csv`:
//!
//! ```text
//! Time,Data,Condition,Current,Label
//! 2025-01-28 14:30:25.050,46.0,music1,None,None
//! ```
//!
//! Every row is flushed as soon as it is written, so a crash can only lose
//! the row in flight. The experiment tags live behind the same lock as the
//! files: a row and the tags stamped onto it are always consistent with
//! respect to a concurrent tag change.

use super::csv_field;
use crate::core::{Channel, Sample};
use crate::error::Result;
use crate::session::{SessionTags, UNSET_TAG};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Header of every channel file
pub const CHANNEL_HEADER: &str = "Time,Data,Condition,Current,Label";

/// Path of a channel's file for a given prefix
pub fn channel_path(prefix: &Path, channel: Channel) -> PathBuf {
    let mut name = prefix
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("_{}.csv", channel.file_stem()));
    prefix.with_file_name(name)
}

/// Append-only stream for one channel
#[derive(Debug)]
struct ChannelSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl ChannelSink {
    /// Open for append; the header goes in only if the file is empty
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if is_empty {
            writeln!(writer, "{}", CHANNEL_HEADER)?;
            writer.flush()?;
        }
        Ok(Self {
            path,
            writer: Some(writer),
        })
    }

    fn append(&mut self, line: &str) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and release the file; a second call is a no-op
    fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct RecorderInner {
    tags: SessionTags,
    prefix: Option<PathBuf>,
    sinks: BTreeMap<Channel, ChannelSink>,
    rows_written: u64,
}

/// Outcome of persisting one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// No stream is open for the sample's channel
    NoSink,
}

/// Channel files plus the experiment tags (recorder lock domain)
#[derive(Debug, Default)]
pub struct Recorder {
    inner: Mutex<RecorderInner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open one stream per channel under `prefix`
    ///
    /// Streams already open are closed first. Parent directories are
    /// created as needed.
    pub fn open(&self, prefix: &Path) -> Result<()> {
        if let Some(parent) = prefix.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut sinks = BTreeMap::new();
        for channel in Channel::ALL {
            let sink = ChannelSink::open(channel_path(prefix, channel))?;
            sinks.insert(channel, sink);
        }

        let mut inner = self.inner.lock();
        for sink in inner.sinks.values_mut() {
            if let Err(e) = sink.close() {
                log::warn!("Failed to close {}: {}", sink.path.display(), e);
            }
        }
        inner.sinks = sinks;
        inner.prefix = Some(prefix.to_path_buf());
        log::info!(
            "Recording {} channels to {}_*.csv",
            inner.sinks.len(),
            prefix.display()
        );
        Ok(())
    }

    /// Append one row for `sample`, stamped with the current tags
    pub fn write(&self, sample: &Sample) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock();
        let line = format_row(sample, &inner.tags);
        let Some(sink) = inner.sinks.get_mut(&sample.channel) else {
            return Ok(WriteOutcome::NoSink);
        };
        if sink.writer.is_none() {
            return Ok(WriteOutcome::NoSink);
        }
        sink.append(&line)?;
        inner.rows_written += 1;
        Ok(WriteOutcome::Written)
    }

    pub fn set_phase(&self, phase: &str) {
        self.inner.lock().tags.phase = phase.to_string();
    }

    pub fn set_context(&self, context: &str) {
        self.inner.lock().tags.context = context.to_string();
    }

    pub fn set_label(&self, label: &str) {
        self.inner.lock().tags.label = label.to_string();
    }

    pub fn tags(&self) -> SessionTags {
        self.inner.lock().tags.clone()
    }

    /// Return every tag to its unset value
    pub fn reset_tags(&self) {
        self.inner.lock().tags = SessionTags::default();
    }

    pub fn prefix(&self) -> Option<PathBuf> {
        self.inner.lock().prefix.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .sinks
            .values()
            .any(|sink| sink.writer.is_some())
    }

    pub fn rows_written(&self) -> u64 {
        self.inner.lock().rows_written
    }

    /// Flush every open stream; streams stay open
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for sink in inner.sinks.values_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    /// Flush and close every stream; safe to call repeatedly
    ///
    /// All streams are attempted even if one fails; the first error is
    /// returned.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut first_err = None;
        let mut closed = 0;
        for sink in inner.sinks.values_mut() {
            if sink.writer.is_some() {
                closed += 1;
            }
            if let Err(e) = sink.close() {
                log::error!("Failed to close {}: {}", sink.path.display(), e);
                first_err.get_or_insert(e);
            }
        }
        if closed > 0 {
            log::info!("Closed {} channel files", closed);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// `Time,Data,Condition,Current,Label`
fn format_row(sample: &Sample, tags: &SessionTags) -> String {
    format!(
        "{},{},{},{},{}",
        csv_field(sample.row_timestamp()),
        sample.channel.format_value(sample.value),
        csv_field(non_empty(&tags.phase)),
        csv_field(non_empty(&tags.context)),
        csv_field(non_empty(&tags.label)),
    )
}

fn non_empty(tag: &str) -> &str {
    if tag.is_empty() { UNSET_TAG } else { tag }
}
