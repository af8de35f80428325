//! Error types for BioSignal IO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// BioSignal IO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (bind, accept, read, file append)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialization error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket address could not be parsed
    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation needed the output path but none was configured
    #[error("Output path not configured")]
    OutputNotConfigured,

    /// A worker thread panicked
    #[error("Thread panic")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
