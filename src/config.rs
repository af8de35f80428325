//! Configuration for the BioSignal IO daemon
//!
//! Loads configuration from a TOML file. Every section is optional and falls
//! back to the defaults below, so an empty file is a valid configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
    pub health: HealthConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// TCP listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP bind address for the sensor stream
    ///
    /// Examples:
    /// - `0.0.0.0:8000` - All interfaces on port 8000
    /// - `127.0.0.1:0` - Localhost, ephemeral port (tests)
    pub bind_address: String,
    /// Blocking read timeout on the client socket
    pub read_timeout_ms: u64,
    /// Largest unterminated line kept in the frame buffer before it is discarded
    pub max_frame_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            read_timeout_ms: 1000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// UDP discovery broadcast configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    /// UDP port the announcement is sent to (separate from the TCP port)
    pub port: u16,
    /// Period between announcements
    pub interval_ms: u64,
    /// Sleep subdivision; bounds how long stop takes to be observed
    pub tick_ms: u64,
    /// Explicit destination IPs. Empty means 255.255.255.255 plus the
    /// derived subnet broadcast address.
    pub targets: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9999,
            interval_ms: 3000,
            tick_ms: 100,
            targets: Vec::new(),
        }
    }
}

/// Reorder buffer / dispatcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum time between two buffer drains
    pub flush_interval_ms: u64,
    /// How often the dispatcher wakes to check whether a flush is due
    pub poll_interval_ms: u64,
    /// Reorder buffer capacity; the oldest sample is evicted past this
    pub max_buffered: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 300,
            poll_interval_ms: 50,
            max_buffered: 100_000,
        }
    }
}

/// Link health configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Silence window after which "signal lost" is raised while connected
    pub signal_timeout_ms: u64,
    /// Interval of the live "latest values" log line
    pub status_log_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            signal_timeout_ms: 5000,
            status_log_interval_ms: 1000,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Prefix of the per-channel files, e.g. `data/case01/bio_result`
    /// produces `data/case01/bio_result_gsr.csv`
    pub base_path: Option<PathBuf>,
    /// File name of the label event log, placed beside the channel files
    pub event_log_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            event_log_name: "bio_event_log.csv".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl DispatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl HealthConfig {
    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_millis(self.status_log_interval_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use biosignal_io::config::ServiceConfig;
    ///
    /// let config = ServiceConfig::from_file("biosignal-io.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.network.bind_address, "0.0.0.0:8000");
        assert_eq!(config.network.read_timeout_ms, 1000);
        assert_eq!(config.discovery.port, 9999);
        assert_eq!(config.discovery.interval_ms, 3000);
        assert_eq!(config.dispatch.flush_interval_ms, 300);
        assert_eq!(config.health.signal_timeout_ms, 5000);
        assert!(config.output.base_path.is_none());
        assert_eq!(config.output.event_log_name, "bio_event_log.csv");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_content = r#"
[network]
bind_address = "127.0.0.1:8100"

[dispatch]
max_buffered = 64
"#;

        let config: ServiceConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.network.bind_address, "127.0.0.1:8100");
        assert_eq!(config.network.read_timeout_ms, 1000);
        assert_eq!(config.dispatch.max_buffered, 64);
        assert_eq!(config.dispatch.flush_interval_ms, 300);
        assert!(config.discovery.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("biosignal-io.toml");

        let mut config = ServiceConfig::default();
        config.output.base_path = Some(PathBuf::from("data/case01/bio_result"));
        config.discovery.targets = vec!["192.168.1.255".to_string()];
        config.to_file(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[network]"));
        assert!(text.contains("[discovery]"));

        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(
            loaded.output.base_path,
            Some(PathBuf::from("data/case01/bio_result"))
        );
        assert_eq!(loaded.discovery.targets, vec!["192.168.1.255".to_string()]);
    }
}
