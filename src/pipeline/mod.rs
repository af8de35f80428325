//! Ordering pipeline between the session server and persistence

pub mod dispatcher;
pub mod reorder;

pub use dispatcher::{Dispatcher, FlushReport, SampleSink, flush_once};
pub use reorder::ReorderBuffer;
