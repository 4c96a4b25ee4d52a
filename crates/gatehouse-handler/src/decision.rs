//! Authorization decisions and their portal redirect URLs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use gatehouse_rules::ProtectionLevel;
use http::header::{HeaderName, COOKIE};
use http::{HeaderMap, HeaderValue};

/// Identity header set on every grant.
pub const REMOTE_USER_HEADER: HeaderName = HeaderName::from_static("lm-remote-user");

/// A credential that must not reach the protected application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hidden {
    /// Drop the whole header.
    Header(HeaderName),
    /// Drop one cookie from the `Cookie` header.
    Cookie(String),
}

/// A granted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Headers to add to the forwarded request, in order.
    pub headers: Vec<(HeaderName, String)>,
    /// Credentials to strip from the forwarded request.
    pub hide: Vec<Hidden>,
    /// Traced user, `None` for skipped rules.
    pub user: Option<String>,
    /// Protection level of the matched rule.
    pub protection: ProtectionLevel,
}

impl Grant {
    /// Grant without session, for `skip` rules.
    pub const fn skipped() -> Self {
        Self {
            headers: Vec::new(),
            hide: Vec::new(),
            user: None,
            protection: ProtectionLevel::Skip,
        }
    }

    /// Apply the grant to headers about to be forwarded.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for hidden in &self.hide {
            match hidden {
                Hidden::Header(name) => {
                    headers.remove(name);
                }
                Hidden::Cookie(name) => strip_cookie(headers, name),
            }
        }
        for (name, value) in &self.headers {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name.clone(), value);
            }
        }
    }
}

/// Outcome of the authorization pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request.
    Allow(Grant),
    /// 403, or a logout redirect when `logout_url` is set.
    DenyForbidden {
        /// Logout target.
        logout_url: Option<String>,
    },
    /// Send the user to the portal.
    RedirectToPortal {
        /// URL the user asked for.
        url: String,
        /// Extra query arguments for the portal.
        args: Option<String>,
    },
    /// 503.
    ServiceUnavailable {
        /// Why.
        reason: String,
    },
    /// 400.
    BadRequest {
        /// Why.
        reason: String,
    },
    /// 401 with a Basic challenge.
    Challenge {
        /// Authentication realm.
        realm: String,
    },
    /// 500.
    ServerError {
        /// Why.
        reason: String,
    },
    /// Redirect that installs a session cookie on this vhost.
    CrossDomain {
        /// URL without the cross-domain parameter.
        location: String,
        /// `Set-Cookie` value.
        cookie: String,
    },
}

impl Decision {
    /// Short name for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Allow(grant) => match grant.protection {
                ProtectionLevel::Skip => "skip",
                _ => "allow",
            },
            Self::DenyForbidden {
                logout_url: Some(_),
            } => "logout",
            Self::DenyForbidden { logout_url: None } => "forbidden",
            Self::RedirectToPortal { .. } => "redirect",
            Self::ServiceUnavailable { .. } => "unavailable",
            Self::BadRequest { .. } => "bad_request",
            Self::Challenge { .. } => "challenge",
            Self::ServerError { .. } => "server_error",
            Self::CrossDomain { .. } => "cross_domain",
        }
    }

    /// Whether the request may proceed.
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Where the client is sent, for portal and logout redirects.
    pub fn portal_location(&self, portal: &str) -> Option<String> {
        match self {
            Self::RedirectToPortal { url, args } => {
                Some(portal_redirect_url(portal, url, args.as_deref()))
            }
            Self::DenyForbidden {
                logout_url: Some(url),
            } => Some(portal_redirect_url(portal, url, Some("logout=1"))),
            Self::CrossDomain { location, .. } => Some(location.clone()),
            _ => None,
        }
    }
}

/// `{portal}?url=<base64(url)>[&args]`, base64 percent-escaped.
pub fn portal_redirect_url(portal: &str, url: &str, args: Option<&str>) -> String {
    let encoded: String =
        url::form_urlencoded::byte_serialize(STANDARD.encode(url).as_bytes()).collect();
    let separator = if portal.contains('?') { '&' } else { '?' };
    let mut location = format!("{portal}{separator}url={encoded}");
    if let Some(args) = args.filter(|a| !a.is_empty()) {
        location.push('&');
        location.push_str(args);
    }
    location
}

fn strip_cookie(headers: &mut HeaderMap, name: &str) {
    let kept: Vec<String> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| {
            !pair.is_empty() && pair.split_once('=').map_or(true, |(key, _)| key.trim() != name)
        })
        .map(str::to_string)
        .collect();
    headers.remove(COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_redirect_url() {
        let location = portal_redirect_url(
            "http://auth.example.com/",
            "http://app.example.com/admin",
            None,
        );
        // base64("http://app.example.com/admin") = aHR0cDovL2FwcC5leGFtcGxlLmNvbS9hZG1pbg==
        assert_eq!(
            location,
            "http://auth.example.com/?url=aHR0cDovL2FwcC5leGFtcGxlLmNvbS9hZG1pbg%3D%3D"
        );

        let location = portal_redirect_url("http://auth.example.com/?lang=fr", "x", Some("logout=1"));
        assert!(location.starts_with("http://auth.example.com/?lang=fr&url="));
        assert!(location.ends_with("&logout=1"));
    }

    #[test]
    fn test_logout_location() {
        let decision = Decision::DenyForbidden {
            logout_url: Some("http://auth.example.com/".to_string()),
        };
        let location = decision.portal_location("http://auth.example.com/").unwrap();
        assert!(location.ends_with("&logout=1"));
        assert_eq!(decision.kind(), "logout");

        let plain = Decision::DenyForbidden { logout_url: None };
        assert!(plain.portal_location("http://auth.example.com/").is_none());
        assert_eq!(plain.kind(), "forbidden");
    }

    #[test]
    fn test_grant_apply() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("lemonldap=abc; theme=dark"));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic Zm9vOmJhcg=="),
        );

        let grant = Grant {
            headers: vec![(REMOTE_USER_HEADER, "alice".to_string())],
            hide: vec![
                Hidden::Cookie("lemonldap".to_string()),
                Hidden::Header(http::header::AUTHORIZATION),
            ],
            user: Some("alice".to_string()),
            protection: ProtectionLevel::Normal,
        };
        grant.apply(&mut headers);

        assert_eq!(headers.get(COOKIE).unwrap(), "theme=dark");
        assert!(headers.get(http::header::AUTHORIZATION).is_none());
        assert_eq!(headers.get("lm-remote-user").unwrap(), "alice");
    }

    #[test]
    fn test_strip_last_cookie_removes_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("lemonldap=abc"));
        strip_cookie(&mut headers, "lemonldap");
        assert!(headers.get(COOKIE).is_none());
    }
}
