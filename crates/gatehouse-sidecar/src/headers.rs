//! Header handling between the front proxy, the sidecar and the upstream.
//!
//! In auth sub-request mode nginx cannot read arbitrary response headers by
//! name, so granted headers are announced as numbered pairs:
//!
//! ```text
//! Headername1: Auth-User      Headervalue1: alice
//! Headername2: Lm-Remote-User Headervalue2: alice
//! ```
//!
//! which an `auth_request_set $name $upstream_http_headername1` block maps
//! back onto the proxied request.

use std::net::IpAddr;

use gatehouse_handler::{Grant, REMOTE_USER_HEADER};
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying the client address chain.
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that must not cross the proxy (HTTP/1.1 hop-by-hop).
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is hop-by-hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    let name_lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&name_lower.as_str())
}

/// Copy `headers` without hop-by-hop entries.
pub fn filter_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Headers forwarded upstream in proxy mode: hop-by-hop removed, the grant
/// applied and the peer appended to `X-Forwarded-For`.
pub fn upstream_headers(incoming: &HeaderMap, grant: &Grant, peer: Option<IpAddr>) -> HeaderMap {
    let mut headers = filter_hop_by_hop(incoming);
    grant.apply(&mut headers);
    if let Some(peer) = peer {
        let chain = headers
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| peer.to_string(), |v| format!("{}, {peer}", v.trim()));
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }
    headers
}

/// Response headers announcing a grant to an auth sub-request caller.
pub fn auth_request_headers(grant: &Grant) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (index, (name, value)) in grant.headers.iter().enumerate() {
        let Ok(value) = HeaderValue::from_str(value) else {
            tracing::warn!(header = %name, "forged header value is not valid HTTP, dropped");
            continue;
        };
        let number = index + 1;
        let (Ok(name_key), Ok(value_key)) = (
            HeaderName::from_bytes(format!("headername{number}").as_bytes()),
            HeaderName::from_bytes(format!("headervalue{number}").as_bytes()),
        ) else {
            continue;
        };
        if let Ok(announced) = HeaderValue::from_str(name.as_str()) {
            headers.insert(name_key, announced);
            headers.insert(value_key, value.clone());
        }
        if name == REMOTE_USER_HEADER {
            headers.insert(REMOTE_USER_HEADER, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_handler::Hidden;
    use gatehouse_rules::ProtectionLevel;
    use http::header::{AUTHORIZATION, COOKIE};

    fn grant() -> Grant {
        Grant {
            headers: vec![
                (HeaderName::from_static("auth-user"), "alice".to_string()),
                (REMOTE_USER_HEADER, "alice".to_string()),
            ],
            hide: vec![Hidden::Cookie("lemonldap".to_string())],
            user: Some("alice".to_string()),
            protection: ProtectionLevel::Normal,
        }
    }

    #[test]
    fn test_is_hop_by_hop() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("cookie"));
        assert!(!is_hop_by_hop("authorization"));
    }

    #[test]
    fn test_auth_request_headers_are_numbered() {
        let headers = auth_request_headers(&grant());
        assert_eq!(headers.get("headername1").unwrap(), "auth-user");
        assert_eq!(headers.get("headervalue1").unwrap(), "alice");
        assert_eq!(headers.get("headername2").unwrap(), "lm-remote-user");
        assert_eq!(headers.get("headervalue2").unwrap(), "alice");
        assert_eq!(headers.get(REMOTE_USER_HEADER).unwrap(), "alice");
        assert!(headers.get("headername3").is_none());
    }

    #[test]
    fn test_upstream_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert(COOKIE, HeaderValue::from_static("lemonldap=abc; lang=fr"));
        incoming.insert(AUTHORIZATION, HeaderValue::from_static("Bearer app-token"));
        incoming.insert("connection", HeaderValue::from_static("keep-alive"));
        incoming.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let headers = upstream_headers(&incoming, &grant(), Some("192.0.2.7".parse().unwrap()));
        assert_eq!(headers.get(COOKIE).unwrap(), "lang=fr");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer app-token");
        assert!(headers.get("connection").is_none());
        assert_eq!(headers.get("auth-user").unwrap(), "alice");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 192.0.2.7");
    }
}
