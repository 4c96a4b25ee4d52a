//! HTTP Basic bridged to portal sessions.
//!
//! The session id is derived from the credentials and a pepper that changes
//! once per session lifetime:
//!
//! ```text
//! pepper = floor(now / timeout) ‖ serverSecret
//! id     = hex(SHA-256(base64Credentials ‖ pepper))
//! ```
//!
//! When no session exists under that id yet, the credentials are posted to
//! the portal, which authenticates them and stores a session under the same
//! id. The lookup is then retried once.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use gatehouse_telemetry::metrics::record_session_lookup;
use http::header::{HeaderName, AUTHORIZATION};
use sha2::{Digest, Sha256};

use super::{
    authorization_credentials, ExtractContext, ExtractedIdentity, IdentityExtractor,
    IdentitySource, PendingIdentity,
};
use crate::crypto::Cipher;
use crate::decision::{Decision, Hidden};
use crate::error::{HandlerError, HandlerResult};
use crate::portal::{PortalClient, SessionCreation};
use crate::request::AccessRequest;
use crate::session::{Session, SessionRetriever};
use crate::BoxFuture;

/// Realm of the Basic challenge.
pub const BASIC_REALM: &str = "LemonLDAP::NG";

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Session id for Basic credentials at `now`.
pub fn basic_session_id(credentials: &str, now: i64, timeout: u64, secret: &str) -> String {
    let window = now.div_euclid(timeout.max(1) as i64);
    let digest = Sha256::digest(format!("{credentials}{window}{secret}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether `id` has the shape of a derived session id.
pub fn is_session_digest(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Basic credentials to portal sessions.
pub struct BasicBridge {
    secret: String,
    timeout: u64,
    portal: Arc<dyn PortalClient>,
    cipher: Option<Arc<dyn Cipher>>,
    auth_choice: Option<(String, String)>,
    deadline: Duration,
}

impl BasicBridge {
    /// Bridge keyed by `secret`, rotating ids every `timeout` seconds.
    pub fn new(
        secret: impl Into<String>,
        timeout: u64,
        portal: Arc<dyn PortalClient>,
        cipher: Option<Arc<dyn Cipher>>,
        deadline: Duration,
    ) -> Self {
        Self {
            secret: secret.into(),
            timeout,
            portal,
            cipher,
            auth_choice: None,
            deadline,
        }
    }

    /// Force an authentication choice on the portal.
    #[must_use]
    pub fn with_auth_choice(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_choice = Some((param.into(), value.into()));
        self
    }

    fn forwarded_for(request: &AccessRequest) -> String {
        let peer = request.remote_ip.map(|ip| ip.to_string());
        match (request.header(X_FORWARDED_FOR), peer) {
            (Some(chain), Some(peer)) if !chain.trim().is_empty() => {
                format!("{}, {peer}", chain.trim())
            }
            (_, Some(peer)) => peer,
            (Some(chain), None) => chain.trim().to_string(),
            (None, None) => String::new(),
        }
    }

    fn decode(credentials: &str) -> Option<(String, String)> {
        let raw = STANDARD.decode(credentials).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (user, password) = text.split_once(':')?;
        Some((user.to_string(), password.to_string()))
    }

    async fn create_session(&self, session_id: &str, pending: PendingIdentity, now: i64) -> HandlerResult<()> {
        if !is_session_digest(session_id) {
            return Err(HandlerError::portal("refusing to create a session for a malformed id"));
        }
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| HandlerError::cipher("no key configured"))?;

        let request = SessionCreation {
            session_id: session_id.to_string(),
            user: pending.username,
            password: pending.password,
            secret: cipher.encrypt(&now.to_string())?,
            forwarded_for: pending.forwarded_for,
            auth_choice: self.auth_choice.clone(),
        };

        tokio::time::timeout(self.deadline, self.portal.create_session(&request))
            .await
            .map_err(|_| HandlerError::Timeout {
                operation: "portal session creation",
            })?
    }
}

impl IdentityExtractor for BasicBridge {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn extract<'a>(
        &'a self,
        request: &'a AccessRequest,
        ctx: ExtractContext<'a>,
    ) -> BoxFuture<'a, Option<ExtractedIdentity>> {
        let identity = authorization_credentials(request, "Basic").and_then(|credentials| {
            let Some((username, password)) = Self::decode(credentials) else {
                tracing::debug!("undecodable Basic credentials");
                return None;
            };
            Some(ExtractedIdentity {
                session_id: basic_session_id(credentials, ctx.now, self.timeout, &self.secret),
                source: IdentitySource::Basic,
                hide: Hidden::Header(AUTHORIZATION),
                pending: Some(PendingIdentity {
                    username,
                    password,
                    forwarded_for: Self::forwarded_for(request),
                }),
            })
        });
        Box::pin(async move { identity })
    }

    fn retrieve<'a>(
        &'a self,
        identity: ExtractedIdentity,
        retriever: &'a SessionRetriever,
        now: i64,
    ) -> BoxFuture<'a, HandlerResult<Session>> {
        Box::pin(async move {
            let ExtractedIdentity {
                session_id,
                pending,
                ..
            } = identity;

            match retriever.retrieve(&session_id, now).await {
                Ok(session) => return Ok(session),
                Err(e) => tracing::debug!(error = %e, "no Basic session yet, asking the portal"),
            }

            let pending = pending.ok_or(HandlerError::SessionNotFound)?;
            let user = pending.username.clone();
            if let Err(e) = self.create_session(&session_id, pending, now).await {
                tracing::warn!(user = %user, error = %e, "portal session creation failed");
                return Err(e);
            }
            record_session_lookup("created");
            retriever.retrieve(&session_id, now).await
        })
    }

    fn redirect_to_portal(&self, url: String, args: Option<String>) -> Decision {
        match args {
            None => Decision::Challenge {
                realm: BASIC_REALM.to_string(),
            },
            Some(args) => Decision::RedirectToPortal {
                url,
                args: Some(args),
            },
        }
    }
}
