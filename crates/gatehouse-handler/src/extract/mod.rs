//! Identity extractors.
//!
//! An extractor finds the session id a request carries. Each handler kind
//! picks one strategy:
//!
//! ```text
//! Main, DevOps             → CookieExtractor
//! AuthBasic                → BasicBridge
//! OAuth2                   → BearerExtractor       (falls back to the cookie)
//! ServiceToken, DevOpsST   → ServiceTokenExtractor (falls back to the cookie)
//! ```
//!
//! Extractors may also override how the session is retrieved (the Basic
//! bridge creates it on the portal, the bearer extractor reads the OIDC
//! store first) and how the user is sent to the portal (the Basic bridge
//! answers with a challenge).

mod basic;
mod bearer;
mod cookie;
mod service_token;

use std::sync::Arc;

use gatehouse_config::HandlerKind;
use http::header::AUTHORIZATION;

pub use basic::{basic_session_id, is_session_digest, BasicBridge, BASIC_REALM};
pub use bearer::BearerExtractor;
pub use cookie::CookieExtractor;
pub use service_token::{
    validate_service_token, ServiceTokenExtractor, TokenRejection, SERVICE_TOKEN_HEADER,
};

use crate::decision::{Decision, Hidden};
use crate::error::HandlerResult;
use crate::request::AccessRequest;
use crate::session::{Session, SessionRetriever};
use crate::BoxFuture;

/// Per-request facts an extractor may need.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    /// Canonical vhost.
    pub vhost: &'a str,
    /// Current UNIX time.
    pub now: i64,
    /// Service token lifetime for this vhost, in seconds.
    pub service_token_ttl: i64,
}

/// Where a session id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// SSO cookie.
    Cookie,
    /// HTTP Basic credentials.
    Basic,
    /// OAuth2 bearer token.
    Bearer,
    /// Service token header.
    ServiceToken,
}

impl IdentitySource {
    /// Name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Basic => "basic",
            Self::Bearer => "bearer",
            Self::ServiceToken => "service_token",
        }
    }
}

/// Credentials kept for a lazy portal session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIdentity {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// `X-Forwarded-For` to send to the portal.
    pub forwarded_for: String,
}

/// A session id found in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedIdentity {
    /// Session id.
    pub session_id: String,
    /// Extraction path.
    pub source: IdentitySource,
    /// Credential to strip before forwarding.
    pub hide: Hidden,
    /// Basic bridge credentials, consumed by retrieval.
    pub pending: Option<PendingIdentity>,
}

impl ExtractedIdentity {
    /// Identity read from the SSO cookie.
    pub fn from_cookie(session_id: String, cookie_name: &str) -> Self {
        Self {
            session_id,
            source: IdentitySource::Cookie,
            hide: Hidden::Cookie(cookie_name.to_string()),
            pending: None,
        }
    }
}

/// Finds the session id of a request.
pub trait IdentityExtractor: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Session id carried by `request`, if any.
    fn extract<'a>(
        &'a self,
        request: &'a AccessRequest,
        ctx: ExtractContext<'a>,
    ) -> BoxFuture<'a, Option<ExtractedIdentity>>;

    /// Load the session of `identity`.
    fn retrieve<'a>(
        &'a self,
        identity: ExtractedIdentity,
        retriever: &'a SessionRetriever,
        now: i64,
    ) -> BoxFuture<'a, HandlerResult<Session>> {
        Box::pin(async move { retriever.retrieve(&identity.session_id, now).await })
    }

    /// Decision sending the user to the portal.
    fn redirect_to_portal(&self, url: String, args: Option<String>) -> Decision {
        Decision::RedirectToPortal { url, args }
    }
}

/// One extractor per strategy, built for a configuration snapshot.
#[derive(Clone)]
pub struct ExtractorSet {
    /// Cookie strategy.
    pub cookie: Arc<dyn IdentityExtractor>,
    /// Basic bridge.
    pub basic: Arc<dyn IdentityExtractor>,
    /// Bearer tokens.
    pub bearer: Arc<dyn IdentityExtractor>,
    /// Service tokens.
    pub service_token: Arc<dyn IdentityExtractor>,
}

impl std::fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorSet").finish_non_exhaustive()
    }
}

impl ExtractorSet {
    /// Strategy for a handler kind.
    pub fn for_kind(&self, kind: HandlerKind) -> &Arc<dyn IdentityExtractor> {
        match kind {
            HandlerKind::Main | HandlerKind::DevOps => &self.cookie,
            HandlerKind::AuthBasic => &self.basic,
            HandlerKind::OAuth2 => &self.bearer,
            HandlerKind::ServiceToken | HandlerKind::DevOpsSt => &self.service_token,
        }
    }
}

/// Credentials after `scheme ` in `Authorization`, scheme matched case-insensitively.
fn authorization_credentials<'r>(request: &'r AccessRequest, scheme: &str) -> Option<&'r str> {
    let value = request.header(AUTHORIZATION)?.trim();
    let (given, rest) = value.split_once(' ')?;
    given
        .eq_ignore_ascii_case(scheme)
        .then(|| rest.trim())
        .filter(|credentials| !credentials.is_empty())
}
