//! Signal channels and the registered-name table used to recognise frame keys.
//!
//! Frames carry one key per channel (`"GSR": 45.2`) and an optional sibling
//! `"GSR_Timestamp"`. Only names present in the [`ChannelRegistry`] are
//! turned into samples; anything else in the frame is ignored, so an
//! unexpected key can never open a new sink.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Suffix of the per-channel client timestamp key
pub const TIMESTAMP_SUFFIX: &str = "_Timestamp";

/// Physiological signal type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Galvanic skin response
    Gsr,
    /// Heart rate
    Hr,
    /// Skin temperature
    Skt,
    /// Raw photoplethysmogram
    PpgRaw,
    /// Peak-to-peak interval
    Ppi,
    /// Activity level
    Act,
    ImuX,
    ImuY,
    ImuZ,
}

impl Channel {
    /// Every built-in channel, in file-opening order
    pub const ALL: [Channel; 9] = [
        Channel::Gsr,
        Channel::Hr,
        Channel::Skt,
        Channel::PpgRaw,
        Channel::Ppi,
        Channel::Act,
        Channel::ImuX,
        Channel::ImuY,
        Channel::ImuZ,
    ];

    /// Key used on the wire
    pub const fn wire_name(self) -> &'static str {
        match self {
            Channel::Gsr => "GSR",
            Channel::Hr => "HR",
            Channel::Skt => "SKT",
            Channel::PpgRaw => "PPGRAW",
            Channel::Ppi => "PPI",
            Channel::Act => "ACT",
            Channel::ImuX => "IMUX",
            Channel::ImuY => "IMUY",
            Channel::ImuZ => "IMUZ",
        }
    }

    /// Suffix of the channel's CSV file (`<prefix>_<file_stem>.csv`)
    pub const fn file_stem(self) -> &'static str {
        match self {
            Channel::Gsr => "gsr",
            Channel::Hr => "hr",
            Channel::Skt => "skt",
            Channel::PpgRaw => "ppgraw",
            Channel::Ppi => "ppi",
            Channel::Act => "act",
            Channel::ImuX => "imux",
            Channel::ImuY => "imuy",
            Channel::ImuZ => "imuz",
        }
    }

    /// Skin temperature is stored at one decimal place; every other channel
    /// keeps full precision.
    pub const fn precision(self) -> Precision {
        match self {
            Channel::Skt => Precision::OneDecimal,
            _ => Precision::Full,
        }
    }

    /// Render a value the way it is persisted for this channel
    ///
    /// Full precision uses the shortest round-trip form, with a signed
    /// two-digit exponent outside `1e-4..1e16` (`1e+16`, `1.5e-07`).
    pub fn format_value(self, value: f64) -> String {
        match self.precision() {
            Precision::OneDecimal => format!("{:.1}", value),
            // Debug keeps a fractional part for whole numbers (75.0, not 75)
            Precision::Full => signed_exponent(&format!("{:?}", value)),
        }
    }
}

/// `1e16` -> `1e+16`, `1e-7` -> `1e-07`
fn signed_exponent(repr: &str) -> String {
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => repr.to_string(),
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Numeric formatting rule for persisted values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Full,
    OneDecimal,
}

/// Registered wire names
///
/// Maps a frame key to its [`Channel`]. `with_alias` is the extension point
/// for devices that use a different key for a known channel.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    names: HashMap<String, Channel>,
}

impl ChannelRegistry {
    /// Registry with the built-in wire names
    pub fn builtin() -> Self {
        let names = Channel::ALL
            .iter()
            .map(|ch| (ch.wire_name().to_string(), *ch))
            .collect();
        Self { names }
    }

    /// Register an additional key for an existing channel
    pub fn with_alias(mut self, name: &str, channel: Channel) -> Self {
        self.names.insert(name.to_string(), channel);
        self
    }

    /// Look up a frame key
    pub fn lookup(&self, name: &str) -> Option<Channel> {
        self.names.get(name).copied()
    }

    /// Iterate over `(key, channel)` pairs
    #[cfg(test)]
    fn entries(&self) -> impl Iterator<Item = (&str, Channel)> {
        self.names.iter().map(|(name, ch)| (name.as_str(), *ch))
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
