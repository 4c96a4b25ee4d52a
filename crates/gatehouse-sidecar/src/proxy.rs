//! Forwarding granted requests to the upstream application (proxy mode).

use std::time::Duration;

use bytes::Bytes;
use gatehouse_config::SidecarSection;
use http::{header::HeaderMap, Method, StatusCode};
use reqwest::Client;

use crate::error::{SidecarError, SidecarResult};

/// HTTP client for the upstream application.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    upstream_url: String,
    timeout: Duration,
}

impl ProxyClient {
    /// Create a client for `section.upstream_url`.
    pub fn new(section: &SidecarSection) -> SidecarResult<Self> {
        let upstream_url = section
            .upstream_url
            .clone()
            .ok_or_else(|| SidecarError::proxy("no upstream configured"))?;
        let timeout = Duration::from_secs(section.upstream_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SidecarError::proxy(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Forward a request to the upstream service.
    pub async fn forward(&self, request: ProxyRequest) -> SidecarResult<ProxyResponse> {
        let url = format!("{}{}", self.upstream_url, request.path);

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SidecarError::upstream(format!("request failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| SidecarError::upstream(format!("failed to read body: {e}")))?;

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }

    /// Upstream base URL.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Request to be forwarded to upstream.
#[derive(Debug)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path (including query string).
    pub path: String,
    /// Request headers, grant already applied.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    /// Create a new proxy request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Set the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = (!body.is_empty()).then_some(body);
        self
    }
}

/// Response from upstream.
#[derive(Debug)]
pub struct ProxyResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl ProxyResponse {
    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
