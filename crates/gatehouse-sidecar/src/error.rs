//! Error types for the Gatehouse sidecar.

use std::fmt;

use gatehouse_config::ConfigError;
use gatehouse_handler::HandlerError;
use thiserror::Error;

/// Sidecar-specific errors.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The handler could not be built.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Upstream connection error.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error message.
        message: String,
        /// Optional HTTP status code from upstream.
        status: Option<u16>,
    },

    /// Proxy error during request forwarding.
    #[error("Proxy error: {message}")]
    Proxy {
        /// Error message.
        message: String,
    },

    /// Server startup error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// Telemetry could not be initialised.
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] gatehouse_telemetry::TelemetryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl SidecarError {
    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            status: None,
        }
    }

    /// Create an upstream error with status code.
    pub fn upstream_with_status(message: impl Into<String>, status: u16) -> Self {
        Self::Upstream {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Handler(_) => 500,
            Self::Upstream { status, .. } => status.unwrap_or(502),
            Self::Proxy { .. } => 502,
            Self::Server { .. } => 500,
            Self::Telemetry(_) => 500,
            Self::Io(_) => 500,
            Self::Http(_) => 400,
        }
    }

    /// Check if this error is recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Proxy { .. })
    }

    /// Error category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Handler(_) => "handler",
            Self::Upstream { .. } => "upstream",
            Self::Proxy { .. } => "proxy",
            Self::Server { .. } => "server",
            Self::Telemetry(_) => "telemetry",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
        }
    }
}

/// Result type for sidecar operations.
pub type SidecarResult<T> = Result<T, SidecarError>;

/// JSON error body.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

impl From<SidecarError> for ErrorResponse {
    fn from(err: SidecarError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error, self.message)
    }
}
