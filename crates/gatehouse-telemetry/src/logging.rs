//! Structured logging for Gatehouse.
//!
//! Installs a `tracing-subscriber` registry with either JSON output
//! (production) or a pretty, human-readable format (development). The
//! filter accepts any `EnvFilter` directive, so `info,gatehouse_handler=debug`
//! works as well as a bare level.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatehouse_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(vhost = "app.example.com", "snapshot published");
//! ```

use gatehouse_config::{LogFormat, TelemetrySection};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log level or filter directive.
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to emit span open/close events.
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include ANSI colors (pretty format only).
    pub ansi: bool,

    /// Whether to include the target (module path).
    pub include_target: bool,

    /// Service name reported at startup.
    pub service_name: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable debug output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ansi: true,
            include_target: true,
            service_name: "gatehouse".to_string(),
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            ansi: false,
            include_target: true,
            service_name: "gatehouse".to_string(),
        }
    }
}

impl From<&TelemetrySection> for LogConfig {
    fn from(section: &TelemetrySection) -> Self {
        let logging = &section.logging;
        let json_format = logging.format == LogFormat::Json;
        Self {
            enabled: true,
            level: logging.level.clone(),
            json_format,
            span_events: !json_format,
            file_line_info: logging.include_location,
            ansi: logging.ansi_enabled,
            include_target: true,
            service_name: section.service_name.clone(),
        }
    }
}

/// Initializes the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the filter is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_ansi(config.ansi)
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
    }

    tracing::info!(service = %config.service_name, "logging initialized");
    Ok(())
}

/// Creates an env filter from a directive string.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the directive is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level: {e}")))
}

/// Standard log field names.
pub mod fields {
    /// Resolved virtual host.
    pub const VHOST: &str = "vhost";

    /// Request URI as seen by the handler.
    pub const URI: &str = "uri";

    /// HTTP method.
    pub const METHOD: &str = "method";

    /// Decision kind (`allow`, `forbidden`, `redirect`, ...).
    pub const DECISION: &str = "decision";

    /// Traced user (`whatToTrace` attribute).
    pub const USER: &str = "user";

    /// Identity extractor that produced the session id.
    pub const SOURCE: &str = "source";

    /// Error description.
    pub const ERROR: &str = "error";
}

/// Logs an access decision at debug level.
#[macro_export]
macro_rules! log_decision {
    ($vhost:expr, $uri:expr, $decision:expr) => {
        tracing::debug!(
            vhost = %$vhost,
            uri = %$uri,
            decision = %$decision,
            "access decision"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_config::LoggingConfig;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert!(config.json_format);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert!(!config.json_format);
        assert!(config.span_events);
        assert!(config.file_line_info);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_from_telemetry_section() {
        let section = TelemetrySection {
            service_name: "edge".to_string(),
            logging: LoggingConfig {
                level: "warn,gatehouse_handler=debug".to_string(),
                format: LogFormat::Pretty,
                ansi_enabled: true,
                include_location: true,
            },
            ..Default::default()
        };

        let config = LogConfig::from(&section);
        assert!(!config.json_format);
        assert!(config.ansi);
        assert!(config.file_line_info);
        assert_eq!(config.service_name, "edge");
        assert!(create_env_filter(&config.level).is_ok());
    }

    #[test]
    fn test_create_env_filter_invalid() {
        assert!(create_env_filter("gatehouse=verbose").is_err());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
