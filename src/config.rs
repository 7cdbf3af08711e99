//! Configuration types for hub-link

use crate::hub::{ExponentialBackoff, ManagerConfig};
use crate::telemetry::LogFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Hub connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Hub endpoint URL (`http(s)://` or `ws(s)://`)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Retry loop attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay of the first reconnect attempt (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound of the random jitter added to each delay (milliseconds)
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    /// Bound on a single open or close (seconds, 0 = no bound)
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Keep-alive ping interval (seconds)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:5000/hubs/di-events".to_string()
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_jitter_ms() -> u64 {
    300
}
fn default_open_timeout_secs() -> u64 {
    15
}
fn default_ping_interval_secs() -> u64 {
    15
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            open_timeout_secs: default_open_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl HubConfig {
    /// Keep-alive ping interval
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Build the connection manager configuration
    pub fn manager_config(&self) -> ManagerConfig {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_jitter_ms),
        );
        let config = ManagerConfig::new(self.endpoint.clone())
            .max_reconnects(self.max_reconnect_attempts)
            .backoff(backoff);

        match self.open_timeout_secs {
            0 => config.no_open_timeout(),
            secs => config.open_timeout(Duration::from_secs(secs)),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
