//! Sidecar HTTP server.
//!
//! Every request goes through the access handler. In auth-request mode
//! the decision itself is the response; in proxy mode granted requests
//! are forwarded upstream with the grant applied.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gatehouse_config::{GatewayConfig, SidecarMode};
use gatehouse_handler::{AccessHandler, AccessRequest, Decision, Grant};
use http::request::Parts;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{SidecarError, SidecarResult};
use crate::headers::{filter_hop_by_hop, upstream_headers};
use crate::health::HealthChecker;
use crate::proxy::{ProxyClient, ProxyRequest};
use crate::response::{decision_response, error_response, json_response, HttpResponse};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Path prefix of the sidecar's own endpoints.
pub const INTERNAL_PREFIX: &str = "/_gatehouse/";

/// Sidecar server.
pub struct SidecarServer {
    listen_addr: String,
    shutdown_timeout: Duration,
    state: Arc<State>,
}

struct State {
    handler: Arc<AccessHandler>,
    proxy: Option<ProxyClient>,
    health: HealthChecker,
    mode: SidecarMode,
}

impl std::fmt::Debug for SidecarServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarServer")
            .field("listen_addr", &self.listen_addr)
            .field("mode", &self.state.mode)
            .field("upstream", &self.state.proxy.as_ref().map(ProxyClient::upstream_url))
            .finish_non_exhaustive()
    }
}

impl SidecarServer {
    /// Create a server answering with `handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if proxy mode is selected without a usable upstream.
    pub fn new(config: &GatewayConfig, handler: Arc<AccessHandler>) -> SidecarResult<Self> {
        let section = &config.sidecar;
        let proxy = match section.mode {
            SidecarMode::Proxy => Some(ProxyClient::new(section)?),
            SidecarMode::AuthRequest => None,
        };

        Ok(Self {
            listen_addr: section.listen_addr.clone(),
            shutdown_timeout: Duration::from_secs(section.shutdown_timeout_secs),
            state: Arc::new(State {
                health: HealthChecker::new(Arc::clone(&handler)),
                handler,
                proxy,
                mode: section.mode,
            }),
        })
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> SidecarResult<TcpListener> {
        let addr: SocketAddr = self.listen_addr.parse().map_err(|e| {
            SidecarError::server(format!("invalid listen address '{}': {e}", self.listen_addr))
        })?;
        TcpListener::bind(addr)
            .await
            .map_err(|e| SidecarError::server(format!("failed to bind to {addr}: {e}")))
    }

    /// Bind and serve until `shutdown` triggers.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> SidecarResult<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` triggers, then wait
    /// for open connections up to the shutdown timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> SidecarResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, mode = ?self.state.mode, "gatehouse sidecar listening");
        if let Some(proxy) = &self.state.proxy {
            info!(upstream = proxy.upstream_url(), "proxying granted requests");
        }

        let tracker = ConnectionTracker::new();
        self.state.health.set_ready(true);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&self.state);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, state, shutdown).await {
                                debug!(%peer, error = %e, "connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    info!("shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        self.state.health.set_ready(false);
        info!(
            timeout = ?self.shutdown_timeout,
            active = tracker.active_connections(),
            "waiting for connections to close"
        );
        tokio::select! {
            () = tracker.wait_for_shutdown() => info!("all connections closed"),
            () = tokio::time::sleep(self.shutdown_timeout) => warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached"
            ),
        }
        info!("sidecar stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<State>,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, &state, peer).await }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => return result,
        () = shutdown.recv() => {
            debug!(%peer, "finishing in-flight request before close");
            conn.as_mut().graceful_shutdown();
        }
    }
    conn.await
}

async fn handle_request(
    req: Request<Incoming>,
    state: &State,
    peer: SocketAddr,
) -> Result<HttpResponse, Infallible> {
    // In proxy mode the prefix belongs to the protected sites.
    if state.mode == SidecarMode::AuthRequest {
        if let Some(endpoint) = req.uri().path().strip_prefix(INTERNAL_PREFIX) {
            return Ok(internal_endpoint(endpoint, &state.health));
        }
    }

    let (parts, body) = req.into_parts();
    let request = AccessRequest::from_parts(&parts, Some(peer.ip()));
    let decision = state.handler.handle(&request).await;

    let response = match (&decision, &state.proxy) {
        (Decision::Allow(grant), Some(proxy)) => {
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "failed to read request body");
                    return Ok(error_response(
                        StatusCode::BAD_REQUEST,
                        "bad_request",
                        "failed to read request body",
                    ));
                }
            };
            forward(proxy, &parts, &request, grant, body, peer).await
        }
        _ => {
            let snapshot = state.handler.snapshot();
            decision_response(&decision, &snapshot.conf().portal, state.mode)
        }
    };
    Ok(response)
}

async fn forward(
    proxy: &ProxyClient,
    parts: &Parts,
    request: &AccessRequest,
    grant: &Grant,
    body: Bytes,
    peer: SocketAddr,
) -> HttpResponse {
    let proxied = ProxyRequest::new(parts.method.clone(), request.uri.clone())
        .with_headers(upstream_headers(&parts.headers, grant, Some(peer.ip())))
        .with_body(body);

    match proxy.forward(proxied).await {
        Ok(upstream) => {
            debug!(status = %upstream.status, "upstream responded");
            let mut response = HttpResponse::new(Full::new(upstream.body));
            *response.status_mut() = upstream.status;
            *response.headers_mut() = filter_hop_by_hop(&upstream.headers);
            response
        }
        Err(e) => {
            error!(error = %e, uri = %request.uri, "upstream request failed");
            error_response(
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_GATEWAY),
                e.category(),
                &e.to_string(),
            )
        }
    }
}

fn internal_endpoint(endpoint: &str, health: &HealthChecker) -> HttpResponse {
    match endpoint {
        "health" => {
            let response = health.liveness();
            let status = if response.status.is_operational() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &response)
        }
        "ready" => {
            let response = health.readiness();
            let status = if response.status.is_ready() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &response)
        }
        "metrics" => match gatehouse_telemetry::render_metrics() {
            Some(body) => {
                let mut response = HttpResponse::new(Full::new(Bytes::from(body)));
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            None => error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                "metrics exporter is disabled",
            ),
        },
        "version" => json_response(
            StatusCode::OK,
            &serde_json::json!({ "name": "gatehouse-sidecar", "version": crate::VERSION }),
        ),
        other => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("unknown internal endpoint: {INTERNAL_PREFIX}{other}"),
        ),
    }
}

