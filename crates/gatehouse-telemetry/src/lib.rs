//! Logging and metrics for Gatehouse.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: Prometheus exposition through the `metrics` facade
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               gatehouse-telemetry             │
//! │                                              │
//! │   ┌─────────────┐          ┌─────────────┐   │
//! │   │   Logging   │          │   Metrics   │   │
//! │   │ (JSON/text) │          │ (Prometheus)│   │
//! │   └──────┬──────┘          └──────┬──────┘   │
//! └──────────┼────────────────────────┼──────────┘
//!            ▼                        ▼
//!      ┌──────────┐            ┌──────────┐
//!      │ stdout   │            │ /metrics │
//!      └──────────┘            └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use gatehouse_telemetry::init_telemetry;
//!
//! let config = gatehouse_config::ConfigLoader::new().load()?;
//! init_telemetry(&config.telemetry)?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, InFlightGuard};

use gatehouse_config::TelemetrySection;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics, from the telemetry section.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(section: &TelemetrySection) -> TelemetryResult<()> {
    init_logging(&LogConfig::from(section))?;
    init_metrics(&section.metrics)?;
    Ok(())
}
