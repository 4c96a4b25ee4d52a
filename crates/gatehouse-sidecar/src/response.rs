//! Rendering access decisions as HTTP responses.

use bytes::Bytes;
use gatehouse_config::SidecarMode;
use gatehouse_handler::Decision;
use http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE, WWW_AUTHENTICATE};
use http::{HeaderValue, Response, StatusCode};
use http_body_util::Full;

use crate::error::ErrorResponse;
use crate::headers::auth_request_headers;

/// Response body type of the sidecar.
pub type HttpResponse = Response<Full<Bytes>>;

/// Render `decision` for the front proxy.
///
/// Portal redirects are `401 + Location` in auth sub-request mode, since the
/// sub-request cannot redirect by itself, and `302` in proxy mode. Grants in
/// proxy mode are forwarded by the caller and never reach this function.
pub fn decision_response(decision: &Decision, portal: &str, mode: SidecarMode) -> HttpResponse {
    let redirect_status = match mode {
        SidecarMode::AuthRequest => StatusCode::UNAUTHORIZED,
        SidecarMode::Proxy => StatusCode::FOUND,
    };

    match decision {
        Decision::Allow(grant) => {
            let mut response = empty(StatusCode::OK);
            response.headers_mut().extend(auth_request_headers(grant));
            response
        }
        Decision::RedirectToPortal { .. }
        | Decision::DenyForbidden {
            logout_url: Some(_),
        } => match decision.portal_location(portal) {
            Some(location) => redirect(redirect_status, &location),
            None => empty(StatusCode::FORBIDDEN),
        },
        Decision::CrossDomain { location, cookie } => {
            let mut response = redirect(redirect_status, location);
            if let Ok(value) = HeaderValue::from_str(cookie) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
            response
        }
        Decision::DenyForbidden { logout_url: None } => {
            error_response(StatusCode::FORBIDDEN, "forbidden", "access denied")
        }
        Decision::Challenge { realm } => {
            let mut response = empty(StatusCode::UNAUTHORIZED);
            if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
                response.headers_mut().insert(WWW_AUTHENTICATE, value);
            }
            response
        }
        Decision::ServiceUnavailable { reason } => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "maintenance", reason)
        }
        Decision::BadRequest { reason } => {
            error_response(StatusCode::BAD_REQUEST, "bad_request", reason)
        }
        Decision::ServerError { .. } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "internal error",
        ),
    }
}

/// Create a JSON response.
pub fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create a JSON error response.
pub fn error_response(status: StatusCode, error: &str, message: &str) -> HttpResponse {
    json_response(status, &ErrorResponse::new(error, message))
}

/// Response with no body.
pub fn empty(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn redirect(status: StatusCode, location: &str) -> HttpResponse {
    let mut response = empty(status);
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => {
            tracing::warn!(location, "redirect target is not a valid header value");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "invalid redirect")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTAL: &str = "http://auth.example.com/";

    #[test]
    fn test_portal_redirect_by_mode() {
        let decision = Decision::RedirectToPortal {
            url: "http://app.example.com/admin".to_string(),
            args: None,
        };
        let response = decision_response(&decision, PORTAL, SidecarMode::AuthRequest);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://auth.example.com/?url=aHR0cDovL2FwcC5leGFtcGxlLmNvbS9hZG1pbg%3D%3D"
        );

        let response = decision_response(&decision, PORTAL, SidecarMode::Proxy);
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[test]
    fn test_logout_redirect() {
        let decision = Decision::DenyForbidden {
            logout_url: Some("http://app.example.com/".to_string()),
        };
        let response = decision_response(&decision, PORTAL, SidecarMode::AuthRequest);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert!(location.ends_with("&logout=1"));
    }

    #[test]
    fn test_challenge() {
        let decision = Decision::Challenge {
            realm: "LemonLDAP::NG".to_string(),
        };
        let response = decision_response(&decision, PORTAL, SidecarMode::AuthRequest);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"LemonLDAP::NG\""
        );
        assert!(response.headers().get(LOCATION).is_none());
    }

    #[test]
    fn test_error_statuses() {
        let cases = [
            (Decision::DenyForbidden { logout_url: None }, StatusCode::FORBIDDEN),
            (
                Decision::ServiceUnavailable {
                    reason: "maintenance".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Decision::BadRequest {
                    reason: "missing Host header".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                Decision::ServerError {
                    reason: "isInNet6() failed".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (decision, status) in cases {
            let response = decision_response(&decision, PORTAL, SidecarMode::Proxy);
            assert_eq!(response.status(), status);
            assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        }
    }

    #[test]
    fn test_cross_domain_sets_cookie() {
        let decision = Decision::CrossDomain {
            location: "http://other.example.org/page".to_string(),
            cookie: "lemonldap=abc; path=/; HttpOnly".to_string(),
        };
        let response = decision_response(&decision, PORTAL, SidecarMode::Proxy);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://other.example.org/page"
        );
        assert_eq!(
            response.headers().get(SET_COOKIE).unwrap(),
            "lemonldap=abc; path=/; HttpOnly"
        );
    }
}
