//! Gatehouse sidecar.
//!
//! Standalone binary that puts the Gatehouse access handler in front of an
//! application. Two deployments are supported:
//!
//! ```text
//!  auth-request mode                      proxy mode
//!
//!  client ──► nginx ──────► app           client ──► sidecar ──► app
//!               │  ▲                                   │
//!   auth_request│  │200 + headers                      │ decide, forge
//!               ▼  │401/403                            │ headers, strip
//!             sidecar                                  │ credentials
//!               │                                      ▼
//!               └──► sessions / portal            sessions / portal
//! ```
//!
//! In auth-request mode the sidecar answers sub-requests: `200` with
//! `headernameN`/`headervalueN` pairs on a grant, `401` with a `Location`
//! to the portal when the user must log in, `403` when denied. In proxy
//! mode granted requests are forwarded with headers forged and credentials
//! stripped, everything else becomes a redirect or an error page.
//!
//! In auth-request mode internal endpoints live under `/_gatehouse/`:
//! `health`, `ready`, `metrics` and `version`. Proxy mode serves none, so
//! nothing bypasses authorization on a protected site.
//!
//! ```bash
//! $ gatehouse-sidecar --config /etc/gatehouse/gatehouse.toml \
//!       --handler-config /etc/gatehouse/lmConf.json
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod headers;
pub mod health;
pub mod proxy;
pub mod response;
pub mod server;
pub mod shutdown;

pub use error::{ErrorResponse, SidecarError, SidecarResult};
pub use health::{HealthChecker, HealthStatus, ReadinessStatus};
pub use proxy::{ProxyClient, ProxyRequest, ProxyResponse};
pub use response::decision_response;
pub use server::SidecarServer;
pub use shutdown::{ConnectionTracker, ShutdownSignal};

/// Sidecar version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
