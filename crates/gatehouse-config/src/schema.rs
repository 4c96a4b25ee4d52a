//! Server and telemetry configuration sections.

use serde::{Deserialize, Serialize};

/// How the sidecar is deployed in front of the application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SidecarMode {
    /// Answer nginx `auth_request` sub-requests.
    #[default]
    AuthRequest,
    /// Reverse proxy granted requests to `upstream_url`.
    Proxy,
}

/// Sidecar server section.
///
/// # Example
///
/// ```
/// use gatehouse_config::{SidecarSection, SidecarMode};
///
/// let section = SidecarSection {
///     listen_addr: "127.0.0.1:8090".to_string(),
///     mode: SidecarMode::Proxy,
///     upstream_url: Some("http://127.0.0.1:3000".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SidecarSection {
    /// Bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Deployment mode.
    #[serde(default)]
    pub mode: SidecarMode,

    /// Upstream application (proxy mode).
    #[serde(default)]
    pub upstream_url: Option<String>,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SidecarSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            mode: SidecarMode::default(),
            upstream_url: None,
            upstream_timeout_secs: default_upstream_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name attached to logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "gatehouse".to_string()
}
