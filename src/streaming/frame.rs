//! Line framing and JSON frame parsing
//!
//! # Wire Format
//!
//! One UTF-8 JSON object per `\n`-terminated line:
//!
//! ```text
//! {"GSR": 45.2, "GSR_Timestamp": "2025-01-28 14:30:25.100", "HR": 75}\n
//! ```
//!
//! Keys naming a registered channel carry the reading; the optional sibling
//! `<KEY>_Timestamp` carries the client's wall-clock time for it. Unknown
//! keys are ignored.

use crate::core::{Channel, ChannelRegistry, TIMESTAMP_SUFFIX};
use crate::error::{Error, Result};
use serde_json::Value;

/// Splits a byte stream into complete lines
///
/// Bytes are buffered raw so a UTF-8 sequence split across two reads is
/// reassembled before decoding. A line longer than `max_frame_bytes` is
/// discarded up to its terminating newline.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
    /// Skipping the remainder of an oversized line
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            max_frame_bytes: max_frame_bytes.max(1),
            discarding: false,
        }
    }

    /// Feed raw bytes, returning every complete non-empty line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            self.buffer.extend_from_slice(head);
            let raw = std::mem::take(&mut self.buffer);
            if raw.len() > self.max_frame_bytes {
                log::warn!("Dropping oversized frame ({} bytes)", raw.len());
                continue;
            }
            match String::from_utf8(raw) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                Err(e) => log::warn!("Dropping frame with invalid UTF-8: {}", e),
            }
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > self.max_frame_bytes {
                log::warn!(
                    "Frame exceeds {} bytes without newline, discarding",
                    self.max_frame_bytes
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }
        lines
    }

    /// Bytes held while waiting for a newline
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// One channel value pulled out of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub channel: Channel,
    pub value: f64,
    pub client_timestamp: Option<String>,
}

/// Parse one line into readings
///
/// Malformed JSON and non-object frames are errors for the whole frame. A
/// key whose value is not numeric is logged and skipped; the other keys of
/// the same frame are still returned.
pub fn parse_frame(line: &str, registry: &ChannelRegistry) -> Result<Vec<Reading>> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(fields) = value else {
        return Err(Error::InvalidParameter(format!(
            "frame is not a JSON object: {}",
            truncate(line)
        )));
    };

    let mut readings = Vec::new();
    for (key, raw) in &fields {
        let Some(channel) = registry.lookup(key) else {
            continue;
        };
        let Some(value) = coerce_value(raw) else {
            log::warn!("Non-numeric {} value {}, skipping", key, raw);
            continue;
        };
        let client_timestamp = fields
            .get(&format!("{}{}", key, TIMESTAMP_SUFFIX))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        readings.push(Reading {
            channel,
            value,
            client_timestamp,
        });
    }
    Ok(readings)
}

/// Numbers and numeric strings; anything non-finite is rejected
fn coerce_value(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(80) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_splits_lines() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.push(b"{\"GSR\":1}\n{\"HR\":2}\n{\"SK");
        assert_eq!(lines, vec!["{\"GSR\":1}", "{\"HR\":2}"]);
        assert_eq!(framer.pending(), 4);

        let lines = framer.push(b"T\":3}\r\n\n");
        assert_eq!(lines, vec!["{\"SKT\":3}"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_framer_reassembles_split_utf8() {
        let mut framer = LineFramer::new(1024);
        let text = "{\"label\":\"é\"}\n".as_bytes();
        // Split inside the two-byte é
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(framer.push(&text[..split]).is_empty());
        assert_eq!(framer.push(&text[split..]), vec!["{\"label\":\"é\"}"]);
    }

    #[test]
    fn test_framer_drops_invalid_utf8() {
        let mut framer = LineFramer::new(1024);
        let lines = framer.push(b"\xff\xfe\n{\"HR\":70}\n");
        assert_eq!(lines, vec!["{\"HR\":70}"]);
    }

    #[test]
    fn test_framer_discards_oversized_line() {
        let mut framer = LineFramer::new(8);
        assert!(framer.push(b"0123456789").is_empty());
        assert_eq!(framer.pending(), 0);
        // Rest of the oversized line is skipped, next line survives
        assert_eq!(framer.push(b"abc\n{\"A\":1}\n"), vec!["{\"A\":1}"]);
    }

    #[test]
    fn test_parse_frame_with_timestamps() {
        let registry = ChannelRegistry::builtin();
        let readings = parse_frame(
            r#"{"GSR": 45.2, "GSR_Timestamp": "2025-01-28 14:30:25.100", "HR": 75, "foo": 1}"#,
            &registry,
        )
        .unwrap();

        assert_eq!(readings.len(), 2);
        let gsr = readings.iter().find(|r| r.channel == Channel::Gsr).unwrap();
        assert_eq!(gsr.value, 45.2);
        assert_eq!(
            gsr.client_timestamp.as_deref(),
            Some("2025-01-28 14:30:25.100")
        );
        let hr = readings.iter().find(|r| r.channel == Channel::Hr).unwrap();
        assert_eq!(hr.value, 75.0);
        assert!(hr.client_timestamp.is_none());
    }

    #[test]
    fn test_parse_frame_skips_bad_values_only() {
        let registry = ChannelRegistry::builtin();
        let readings = parse_frame(
            r#"{"GSR": "abc", "HR": "72.5", "SKT": null, "ACT": true, "PPI": 812}"#,
            &registry,
        )
        .unwrap();
        let channels: Vec<Channel> = readings.iter().map(|r| r.channel).collect();
        assert_eq!(channels, vec![Channel::Hr, Channel::Ppi]);
        assert_eq!(readings[0].value, 72.5);
    }

    #[test]
    fn test_parse_frame_rejects_malformed() {
        let registry = ChannelRegistry::builtin();
        assert!(matches!(
            parse_frame("{not json", &registry),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            parse_frame("[1, 2]", &registry),
            Err(Error::InvalidParameter(_))
        ));
        assert!(parse_frame("{}", &registry).unwrap().is_empty());
    }

    #[test]
    fn test_parse_frame_uses_aliases() {
        let registry = ChannelRegistry::builtin().with_alias("EDA", Channel::Gsr);
        let readings = parse_frame(
            r#"{"EDA": 3.5, "EDA_Timestamp": "2025-01-28 14:30:25.000"}"#,
            &registry,
        )
        .unwrap();
        assert_eq!(readings[0].channel, Channel::Gsr);
        assert!(readings[0].client_timestamp.is_some());
    }
}
