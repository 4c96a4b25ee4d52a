//! The request facts the handler decides on.

use std::net::IpAddr;

use http::header::{HeaderName, HOST};
use http::{HeaderMap, Method};

/// URI of the original request in auth sub-request deployments.
pub const X_ORIGINAL_URI: HeaderName = HeaderName::from_static("x-original-uri");

/// An incoming request, stripped of its body.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query of the protected resource.
    pub uri: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Peer address.
    pub remote_ip: Option<IpAddr>,
}

impl AccessRequest {
    /// Build from request parts.
    ///
    /// `X-Original-URI` wins over the request target so that an auth
    /// sub-request is judged on the URI the client asked for.
    pub fn from_parts(parts: &http::request::Parts, remote_ip: Option<IpAddr>) -> Self {
        let uri = parts
            .headers
            .get(&X_ORIGINAL_URI)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(
                || {
                    parts
                        .uri
                        .path_and_query()
                        .map_or_else(|| "/".to_string(), ToString::to_string)
                },
                str::to_string,
            );
        Self {
            method: parts.method.clone(),
            uri,
            headers: parts.headers.clone(),
            remote_ip,
        }
    }

    /// Request for `uri` with no headers.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            remote_ip: None,
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Set the peer address.
    #[must_use]
    pub const fn with_remote_ip(mut self, ip: IpAddr) -> Self {
        self.remote_ip = Some(ip);
        self
    }

    /// First value of a header as text.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Host` header without port, lowercased.
    pub fn host(&self) -> Option<String> {
        let raw = self.header(HOST)?.trim();
        let host = strip_port(raw);
        (!host.is_empty()).then(|| host.to_ascii_lowercase())
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split_once(']').map_or(host, |(addr, _)| addr);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_uri_wins() {
        let (parts, ()) = http::Request::builder()
            .uri("/auth")
            .header("x-original-uri", "/admin?x=1")
            .body(())
            .unwrap()
            .into_parts();
        let request = AccessRequest::from_parts(&parts, None);
        assert_eq!(request.uri, "/admin?x=1");
    }

    #[test]
    fn test_request_target_fallback() {
        let (parts, ()) = http::Request::builder()
            .uri("http://app.example.com/index?lang=fr")
            .body(())
            .unwrap()
            .into_parts();
        let request = AccessRequest::from_parts(&parts, None);
        assert_eq!(request.uri, "/index?lang=fr");
    }

    #[test]
    fn test_host_strip_port() {
        let request = AccessRequest::new(Method::GET, "/").with_header("host", "App.Example.com:8443");
        assert_eq!(request.host().as_deref(), Some("app.example.com"));

        let request = AccessRequest::new(Method::GET, "/").with_header("host", "[::1]:80");
        assert_eq!(request.host().as_deref(), Some("::1"));

        let request = AccessRequest::new(Method::GET, "/");
        assert_eq!(request.host(), None);
    }
}
