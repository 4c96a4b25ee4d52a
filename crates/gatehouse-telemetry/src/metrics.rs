//! Prometheus metrics for Gatehouse.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `gatehouse_decisions_total` | Counter | `decision` | Access decisions |
//! | `gatehouse_request_duration_seconds` | Histogram | `decision` | Pipeline latency |
//! | `gatehouse_policy_refresh_total` | Counter | `outcome` | Remote policy fetches |
//! | `gatehouse_session_lookups_total` | Counter | `outcome` | Session retrievals |
//! | `gatehouse_in_flight_requests` | Gauge | - | Requests being decided |
//!
//! Recording functions are no-ops until a recorder is installed, so the
//! handler can be embedded without the exporter.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use gatehouse_config::MetricsConfig;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Counter of access decisions.
pub const DECISIONS_TOTAL: &str = "gatehouse_decisions_total";
/// Histogram of pipeline latency.
pub const REQUEST_DURATION: &str = "gatehouse_request_duration_seconds";
/// Counter of remote policy refreshes.
pub const POLICY_REFRESH_TOTAL: &str = "gatehouse_policy_refresh_total";
/// Counter of session retrievals.
pub const SESSION_LOOKUPS_TOTAL: &str = "gatehouse_session_lookups_total";
/// Gauge of in-flight requests.
pub const IN_FLIGHT: &str = "gatehouse_in_flight_requests";

// 1ms .. 5s; decisions are dominated by session store latency.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder and its HTTP listener.
///
/// Does nothing when metrics are disabled.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for a bad listen address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

/// Renders metrics in Prometheus text format, `None` before [`init_metrics`].
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(DECISIONS_TOTAL, "Access decisions by kind");
    describe_histogram!(
        REQUEST_DURATION,
        "Time spent deciding a request, in seconds"
    );
    describe_counter!(
        POLICY_REFRESH_TOTAL,
        "Remote policy refreshes by outcome"
    );
    describe_counter!(SESSION_LOOKUPS_TOTAL, "Session retrievals by outcome");
    describe_gauge!(IN_FLIGHT, "Requests currently being decided");
}

/// Records a finished decision.
pub fn record_decision(decision: &'static str, duration: Duration) {
    counter!(DECISIONS_TOTAL, "decision" => decision).increment(1);
    histogram!(REQUEST_DURATION, "decision" => decision).record(duration.as_secs_f64());
}

/// Records a remote policy refresh (`ok`, `fetch_error`, `compile_error`, `cached`).
pub fn record_policy_refresh(outcome: &'static str) {
    counter!(POLICY_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

/// Records a session retrieval (`found`, `missing`, `expired`, `error`, `created`).
pub fn record_session_lookup(outcome: &'static str) {
    counter!(SESSION_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

/// Decrements the in-flight gauge on drop.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT).decrement(1.0);
    }
}
