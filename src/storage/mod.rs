//! Persistence: per-channel CSV streams and the label event log

pub mod channel_sink;
pub mod event_log;

pub use channel_sink::{CHANNEL_HEADER, Recorder, WriteOutcome, channel_path};
pub use event_log::{EVENT_LOG_HEADER, EventLog, LABEL_CHANGE};

use std::borrow::Cow;

/// Quote a CSV field if it contains a separator, quote or line break
pub(crate) fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field() {
        assert_eq!(csv_field("music1"), "music1");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
