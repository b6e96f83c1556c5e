//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`COURIER_CONFIG`, or one of the default paths)
//! - Environment variables (`COURIER_*`, nested keys separated by `__`)

use anyhow::{bail, Context, Result};
use courier_core::NotifierConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file locations, searched in order.
const CONFIG_PATHS: [&str; 3] = [
    "courier.toml",
    "/etc/courier/courier.toml",
    "~/.config/courier/courier.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Event stream endpoint configuration.
    #[serde(default)]
    pub sse: SseConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Timestamp broadcast configuration.
    #[serde(default)]
    pub ticker: TickerConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Event stream endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Path prefix; streams are served at `{path_prefix}/{user_id}`.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// SSE event name for every notification.
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Timestamp broadcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerConfig {
    /// Run the ticker.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub interval_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-user broadcast capacity before slow streams start skipping.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_path_prefix() -> String {
    "/sse".to_string()
}

fn default_event_name() -> String {
    "tick".to_string()
}

fn default_heartbeat_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_tick_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sse: SseConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            ticker: TickerConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            event_name: default_event_name(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_tick_interval(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// the result fails validation.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = Self::find_file() {
            builder = builder.add_source(
                ::config::File::from(path.as_path()).format(::config::FileFormat::Toml),
            );
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// `COURIER_CONFIG` if set, otherwise the first default path that exists.
    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("COURIER_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).into_owned()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists())
    }

    /// Reject values that would only fail later at request time.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.sse.path_prefix.starts_with('/') {
            bail!("sse.path_prefix must start with '/': {}", self.sse.path_prefix);
        }
        if self.sse.event_name.is_empty() || self.sse.event_name.contains(['\n', '\r']) {
            bail!("sse.event_name must be a non-empty single line");
        }
        if self.heartbeat.interval_ms == 0 {
            bail!("heartbeat.interval_ms must be greater than zero");
        }
        if self.ticker.interval_ms == 0 {
            bail!("ticker.interval_ms must be greater than zero");
        }
        if self.limits.channel_capacity == 0 {
            bail!("limits.channel_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Route for the event stream endpoint.
    #[must_use]
    pub fn stream_route(&self) -> String {
        format!("{}/:user_id", self.sse.path_prefix.trim_end_matches('/'))
    }

    /// Notifier settings derived from this configuration.
    #[must_use]
    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            channel_capacity: self.limits.channel_capacity,
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
        }
    }

    /// Period between timestamp broadcasts.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.ticker.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sse.path_prefix, "/sse");
        assert_eq!(config.sse.event_name, "tick");
        assert_eq!(config.heartbeat.interval_ms, 15_000);
        assert_eq!(config.ticker.interval_ms, 5_000);
        assert!(config.ticker.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [heartbeat]
            interval_ms = 1000

            [ticker]
            enabled = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.heartbeat.interval_ms, 1000);
        assert!(!config.ticker.enabled);
        assert_eq!(config.ticker.interval_ms, 5_000);
        assert_eq!(
            config.notifier_config().heartbeat_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_stream_route() {
        let mut config = Config::default();
        assert_eq!(config.stream_route(), "/sse/:user_id");

        config.sse.path_prefix = "/events/".to_string();
        assert_eq!(config.stream_route(), "/events/:user_id");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sse.event_name = "two\nlines".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sse.path_prefix = "sse".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.heartbeat.interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
