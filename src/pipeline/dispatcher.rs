//! Periodic flush of the reorder buffer into persistence
//!
//! A dedicated thread wakes every `poll_interval` and, once `flush_interval`
//! has elapsed since the previous flush, drains the reorder buffer and hands
//! each sample to the sink in sorted order. When the running flag clears, one
//! final drain runs before the thread exits so nothing buffered is lost on a
//! clean stop.

use super::reorder::ReorderBuffer;
use crate::config::DispatchConfig;
use crate::core::Sample;
use crate::error::{Error, Result};
use crate::storage::{Recorder, WriteOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Warn about unconfigured output once per this many skipped samples
const NO_SINK_LOG_EVERY: u64 = 500;

/// Destination for dispatched samples
pub trait SampleSink: Send + Sync {
    fn persist(&self, sample: &Sample) -> Result<WriteOutcome>;
}

impl SampleSink for Recorder {
    fn persist(&self, sample: &Sample) -> Result<WriteOutcome> {
        self.write(sample)
    }
}

/// Result of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub drained: usize,
    pub written: usize,
    /// Samples for channels with no open file
    pub skipped: usize,
    pub failed: usize,
}

/// Drain the buffer once and persist every sample in order
///
/// A failing write is logged and the rest of the batch still goes out.
pub fn flush_once(buffer: &ReorderBuffer, sink: &dyn SampleSink) -> FlushReport {
    let batch = buffer.drain_sorted();
    let mut report = FlushReport {
        drained: batch.len(),
        ..FlushReport::default()
    };

    for sample in &batch {
        match sink.persist(sample) {
            Ok(WriteOutcome::Written) => report.written += 1,
            Ok(WriteOutcome::NoSink) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                log::error!(
                    "Failed to persist {} sample #{}: {}",
                    sample.channel,
                    sample.sequence,
                    e
                );
            }
        }
    }
    report
}

/// Background dispatcher thread handle
pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatcher; it runs until `running` is cleared
    pub fn spawn(
        buffer: Arc<ReorderBuffer>,
        sink: Arc<dyn SampleSink>,
        running: Arc<AtomicBool>,
        config: &DispatchConfig,
    ) -> Result<Self> {
        let flush_interval = config.flush_interval();
        let poll_interval = config.poll_interval();

        let handle = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || {
                log::info!(
                    "Dispatcher started (flush every {}ms)",
                    flush_interval.as_millis()
                );
                let mut last_flush = Instant::now();
                let mut skipped_total = 0u64;
                let mut written_total = 0u64;

                while running.load(Ordering::Relaxed) {
                    thread::sleep(poll_interval);
                    if last_flush.elapsed() < flush_interval {
                        continue;
                    }
                    last_flush = Instant::now();

                    let report = flush_once(&buffer, sink.as_ref());
                    written_total += report.written as u64;
                    if report.skipped > 0 {
                        let before = skipped_total;
                        skipped_total += report.skipped as u64;
                        if before / NO_SINK_LOG_EVERY != skipped_total / NO_SINK_LOG_EVERY
                            || before == 0
                        {
                            log::warn!(
                                "Recording without configured output; {} samples discarded",
                                skipped_total
                            );
                        }
                    }
                }

                let report = flush_once(&buffer, sink.as_ref());
                written_total += report.written as u64;
                log::info!(
                    "Dispatcher stopped ({} rows written, {} in final drain)",
                    written_total,
                    report.drained
                );
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to finish its final drain
    pub fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanic),
            None => Ok(()),
        }
    }
}
