//! Encrypted inter-service tokens.
//!
//! A service token is `cipher.encrypt("timestamp:sessionId:vhost1,vhost2")`
//! sent in `X-Llng-Token`. It is accepted for a short time and only on the
//! listed virtual hosts; anything else falls back to the SSO cookie.

use std::sync::Arc;

use http::header::HeaderName;
use thiserror::Error;

use super::{CookieExtractor, ExtractContext, ExtractedIdentity, IdentityExtractor, IdentitySource};
use crate::crypto::Cipher;
use crate::decision::Hidden;
use crate::request::AccessRequest;
use crate::BoxFuture;

/// Header carrying the service token.
pub const SERVICE_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-llng-token");

/// Why a service token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    /// Undecryptable or not `timestamp:id:vhosts`.
    #[error("malformed service token")]
    Malformed,
    /// Empty vhost list.
    #[error("service token lists no vhost")]
    NoVhost,
    /// Outside `[now - ttl, now]`.
    #[error("expired service token")]
    Expired,
    /// Current vhost not listed.
    #[error("service token not valid for {0}")]
    Unauthorized(String),
}

/// Check a decrypted token for `vhost` at `now`, returning its session id.
///
/// Checks run in order: vhost list present, timestamp within
/// `[now - ttl, now]`, `vhost` listed.
pub fn validate_service_token(
    plaintext: &str,
    vhost: &str,
    now: i64,
    ttl: i64,
) -> Result<String, TokenRejection> {
    let mut parts = plaintext.splitn(3, ':');
    let timestamp = parts.next().unwrap_or_default();
    let session_id = parts.next().unwrap_or_default();
    let vhosts: Vec<&str> = parts
        .next()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if vhosts.is_empty() {
        return Err(TokenRejection::NoVhost);
    }
    let timestamp: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| TokenRejection::Malformed)?;
    if session_id.is_empty() {
        return Err(TokenRejection::Malformed);
    }
    if timestamp < now - ttl || timestamp > now {
        return Err(TokenRejection::Expired);
    }
    if !vhosts.iter().any(|v| v.eq_ignore_ascii_case(vhost)) {
        return Err(TokenRejection::Unauthorized(vhost.to_string()));
    }
    Ok(session_id.to_string())
}

/// Service tokens with cookie fallback.
pub struct ServiceTokenExtractor {
    cipher: Option<Arc<dyn Cipher>>,
    cookie: CookieExtractor,
}

impl ServiceTokenExtractor {
    /// Extractor decrypting with `cipher`.
    pub fn new(cipher: Option<Arc<dyn Cipher>>, cookie: CookieExtractor) -> Self {
        Self { cipher, cookie }
    }

    fn token_identity(&self, token: &str, ctx: ExtractContext<'_>) -> Result<String, TokenRejection> {
        let cipher = self.cipher.as_ref().ok_or(TokenRejection::Malformed)?;
        let plaintext = cipher.decrypt(token).map_err(|_| TokenRejection::Malformed)?;
        validate_service_token(&plaintext, ctx.vhost, ctx.now, ctx.service_token_ttl)
    }
}

impl IdentityExtractor for ServiceTokenExtractor {
    fn name(&self) -> &'static str {
        "service_token"
    }

    fn extract<'a>(
        &'a self,
        request: &'a AccessRequest,
        ctx: ExtractContext<'a>,
    ) -> BoxFuture<'a, Option<ExtractedIdentity>> {
        let identity = match request.header(&SERVICE_TOKEN_HEADER) {
            Some(token) => match self.token_identity(token, ctx) {
                Ok(session_id) => Some(ExtractedIdentity {
                    session_id,
                    source: IdentitySource::ServiceToken,
                    hide: Hidden::Header(SERVICE_TOKEN_HEADER),
                    pending: None,
                }),
                Err(rejection) => {
                    tracing::warn!(vhost = ctx.vhost, reason = %rejection, "service token rejected");
                    None
                }
            },
            None => None,
        };
        let identity = identity.or_else(|| self.cookie.identity(request));
        Box::pin(async move { identity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "1700000000:sess-abc:vhostA,vhostB";

    #[test]
    fn test_valid_token() {
        assert_eq!(
            validate_service_token(TOKEN, "vhostA", 1_700_000_010, 30),
            Ok("sess-abc".to_string())
        );
    }

    #[test]
    fn test_other_vhost_rejected() {
        assert_eq!(
            validate_service_token(TOKEN, "vhostC", 1_700_000_010, 30),
            Err(TokenRejection::Unauthorized("vhostC".to_string()))
        );
    }

    #[test]
    fn test_expired() {
        assert_eq!(
            validate_service_token(TOKEN, "vhostA", 1_700_000_050, 30),
            Err(TokenRejection::Expired)
        );
        // From the future.
        assert_eq!(
            validate_service_token(TOKEN, "vhostA", 1_699_999_990, 30),
            Err(TokenRejection::Expired)
        );
    }

    #[test]
    fn test_check_order() {
        // Missing vhosts wins over an expired timestamp.
        assert_eq!(
            validate_service_token("1:sess:", "vhostA", 1_700_000_000, 30),
            Err(TokenRejection::NoVhost)
        );
        // Expiry wins over an unlisted vhost.
        assert_eq!(
            validate_service_token("1:sess:vhostB", "vhostA", 1_700_000_000, 30),
            Err(TokenRejection::Expired)
        );
        assert_eq!(
            validate_service_token("soon:sess:vhostA", "vhostA", 1_700_000_000, 30),
            Err(TokenRejection::Malformed)
        );
    }
}
