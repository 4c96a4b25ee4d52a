//! Liveness and readiness of the sidecar.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gatehouse_handler::AccessHandler;
use serde::{Deserialize, Serialize};

/// Health status of the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Sidecar is healthy.
    Healthy,
    /// Sidecar is degraded but functional.
    Degraded,
    /// Sidecar is unhealthy.
    Unhealthy,
}

impl HealthStatus {
    /// Check if the status indicates the service is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Readiness status of the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    /// Sidecar is ready to handle traffic.
    Ready,
    /// Sidecar is not ready.
    NotReady,
}

impl ReadinessStatus {
    /// Check if the sidecar is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status.
    pub status: HealthStatus,
    /// Individual check results.
    pub checks: Vec<CheckResult>,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Version information.
    pub version: String,
}

/// Readiness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status.
    pub status: ReadinessStatus,
    /// Generation of the active configuration snapshot.
    pub generation: u64,
    /// Individual check results.
    pub checks: Vec<CheckResult>,
}

/// Result of a single check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check.
    pub name: String,
    /// Whether the check passed.
    pub passed: bool,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time taken for the check in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            duration_ms: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    /// Set the duration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Set the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Health checker backed by the live handler.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: Instant,
    ready: AtomicBool,
    handler: Arc<AccessHandler>,
}

impl HealthChecker {
    /// Create a checker. Not ready until [`set_ready`](Self::set_ready).
    pub fn new(handler: Arc<AccessHandler>) -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(false),
            handler,
        }
    }

    /// Mark the sidecar as ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if the sidecar is ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Get the uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Perform a liveness check.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            checks: vec![CheckResult::pass("process").with_message("sidecar is running")],
            uptime_seconds: self.uptime().as_secs(),
            version: crate::VERSION.to_string(),
        }
    }

    /// Perform a readiness check against the active snapshot.
    pub fn readiness(&self) -> ReadinessResponse {
        let start = Instant::now();
        let snapshot = self.handler.snapshot();
        let vhosts = snapshot.vhost_names().count();

        let mut checks = vec![CheckResult::pass("config")
            .with_message(format!("generation {}", snapshot.generation()))];
        checks.push(if vhosts == 0 {
            CheckResult::fail("vhosts", "no virtual host configured")
        } else {
            CheckResult::pass("vhosts").with_message(format!("{vhosts} configured"))
        });
        checks.push(if self.is_ready() {
            CheckResult::pass("listener")
        } else {
            CheckResult::fail("listener", "not accepting connections")
        });
        let elapsed = start.elapsed();
        let checks: Vec<_> = checks.into_iter().map(|c| c.with_duration(elapsed)).collect();

        let status = if checks.iter().all(|c| c.passed) {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::NotReady
        };

        ReadinessResponse {
            status,
            generation: snapshot.generation(),
            checks,
        }
    }
}
