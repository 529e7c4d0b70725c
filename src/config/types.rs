//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service identity.
    pub service: ServiceConfig,
    /// Transport listener.
    pub transport: TransportConfig,
    /// Metrics bus, dashboard and external reporting.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Service-discovery announcements.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name, the `service` tag on every metric (e.g., "billing").
    pub name: String,
    /// Host tag. Falls back to the OS hostname.
    #[serde(default)]
    pub host: Option<String>,
}

impl ServiceConfig {
    /// Configured host, else `$HOSTNAME`, else `/etc/hostname`, else "localhost".
    pub fn host_name(&self) -> String {
        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            return host.to_string();
        }
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Transport listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Address the transport listener binds.
    pub address: SocketAddr,
    /// Public gateway address, announced but not bound by this process.
    #[serde(default)]
    pub gateway_address: Option<SocketAddr>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Address of the dashboard / scrape HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,
    /// JSON dashboard route.
    #[serde(default = "default_dashboard_uri_path")]
    pub dashboard_uri_path: String,
    /// Prometheus text exposition route (served only with `report_prometheus`).
    #[serde(default = "default_prometheus_uri_path")]
    pub prometheus_uri_path: String,
    /// Recent events kept by the dashboard aggregator.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Bus ingress queue depth.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Runtime sampler period in seconds.
    #[serde(default = "default_interval_secs")]
    pub runtime_interval_secs: u64,
    /// Relay events into the Prometheus registry.
    #[serde(default)]
    pub report_prometheus: bool,
    /// Prometheus relay flush period in seconds.
    #[serde(default = "default_interval_secs")]
    pub prometheus_interval_secs: u64,
    /// Relay events to a StatsD daemon.
    #[serde(default)]
    pub report_statsd: bool,
    /// StatsD `host:port`.
    #[serde(default)]
    pub statsd_address: Option<String>,
    /// Prefix prepended to every StatsD metric name.
    #[serde(default)]
    pub statsd_prefix: Option<String>,
    /// StatsD relay flush period in seconds.
    #[serde(default = "default_interval_secs")]
    pub statsd_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
            dashboard_uri_path: default_dashboard_uri_path(),
            prometheus_uri_path: default_prometheus_uri_path(),
            cache_size: default_cache_size(),
            queue_capacity: default_queue_capacity(),
            runtime_interval_secs: default_interval_secs(),
            report_prometheus: false,
            prometheus_interval_secs: default_interval_secs(),
            report_statsd: false,
            statsd_address: None,
            statsd_prefix: None,
            statsd_interval_secs: default_interval_secs(),
        }
    }
}

impl MetricsConfig {
    pub fn runtime_interval(&self) -> Duration {
        Duration::from_secs(self.runtime_interval_secs)
    }

    pub fn prometheus_interval(&self) -> Duration {
        Duration::from_secs(self.prometheus_interval_secs)
    }

    pub fn statsd_interval(&self) -> Duration {
        Duration::from_secs(self.statsd_interval_secs)
    }
}

/// Service-discovery configuration.
///
/// Each `*_path` that is set produces one registration; unset paths are
/// skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Announce on startup, release on shutdown.
    #[serde(default)]
    pub enabled: bool,
    /// Registry base URL (e.g., "http://registry:8500/v1/services").
    #[serde(default)]
    pub registry_url: Option<String>,
    /// Registry path for the metrics endpoint.
    #[serde(default)]
    pub metrics_path: Option<String>,
    /// Registry path for the transport endpoint.
    #[serde(default)]
    pub transport_path: Option<String>,
    /// Registry path for the gateway endpoint.
    #[serde(default)]
    pub gateway_path: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_discovery_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            registry_url: None,
            metrics_path: None,
            transport_path: None,
            gateway_path: None,
            timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}
