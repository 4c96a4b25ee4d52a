//! Typed configuration for Gatehouse.
//!
//! This crate provides the configuration of the Gatehouse access-control
//! gateway with support for:
//! - TOML and JSON configuration files
//! - LemonLDAP::NG compatible handler keys (`locationRules`, `exportedHeaders`, ...)
//! - Environment variable overrides
//! - Layered configuration (defaults → file → env)
//! - File watching for hot reload
//!
//! # Overview
//!
//! [`GatewayConfig`] groups three sections:
//!
//! - [`SidecarSection`] - listener, deployment mode, upstream
//! - [`TelemetrySection`] - logging and metrics
//! - [`HandlerConf`] - cookie, portal, timeouts, rules and headers per vhost
//!
//! # Configuration File Format
//!
//! ```toml
//! [sidecar]
//! listen_addr = "0.0.0.0:8090"
//! mode = "auth_request"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [handler]
//! portal = "https://auth.example.com/"
//! cookieName = "lemonldap"
//! timeout = 72000
//!
//! [handler.locationRules."app.example.com"]
//! "^/admin" = "$uid eq 'root'"
//! default = "accept"
//!
//! [handler.exportedHeaders."app.example.com"]
//! Auth-User = "$uid"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `GATEHOUSE__SIDECAR__LISTEN_ADDR=0.0.0.0:9000`
//! - `GATEHOUSE__HANDLER__PORTAL=https://auth.example.com/`
//! - `GATEHOUSE__TELEMETRY__LOGGING__LEVEL=debug`

#![warn(missing_docs)]

mod config;
mod error;
mod handler;
mod loader;
mod schema;
mod watcher;

pub use config::*;
pub use error::ConfigError;
pub use handler::*;
pub use loader::ConfigLoader;
pub use schema::*;
pub use watcher::{FileChangeEvent, FileChangeKind, FileWatcher, FileWatcherBuilder};
