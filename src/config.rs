use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the shuttle backend REST API.
    pub api_base_url: String,
    /// Base URL of the WebSocket push endpoint. When unset the push channel
    /// is disabled for the lifetime of the process and polling carries live
    /// tracking alone (degraded, not broken).
    #[serde(default)]
    pub ws_base_url: Option<String>,
    /// Live tracking configuration
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Configuration for the live tracking loop
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Interval in milliseconds between snapshot polls (default: 5000)
    #[serde(default = "TrackingConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// First reconnect delay in milliseconds after the push channel drops
    /// unexpectedly (default: 1000). Doubles per attempt.
    #[serde(default = "TrackingConfig::default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    /// Cap on the reconnect delay in milliseconds (default: 30000)
    #[serde(default = "TrackingConfig::default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// HTTP request timeout in seconds (default: 30)
    #[serde(default = "TrackingConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            reconnect_initial_ms: Self::default_reconnect_initial_ms(),
            reconnect_max_ms: Self::default_reconnect_max_ms(),
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

impl TrackingConfig {
    fn default_poll_interval_ms() -> u64 {
        5000
    }
    fn default_reconnect_initial_ms() -> u64 {
        1000
    }
    fn default_reconnect_max_ms() -> u64 {
        30_000
    }
    fn default_request_timeout_secs() -> u64 {
        30
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
