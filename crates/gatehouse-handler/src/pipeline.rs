//! The authorization pipeline.
//!
//! [`AccessHandler::handle`] walks one request through:
//!
//! ```text
//! resolve host ─▶ maintenance ─▶ rule source (static | remote)
//!      │                               │
//!      ▼                               ▼
//!  BadRequest                    classify URI ──skip──▶ Allow
//!                                      │
//!                            cross-domain cookie? ──▶ CrossDomain
//!                                      │
//!                               extract identity ──none──▶ portal
//!                                      │
//!                               retrieve session ──fail──▶ portal
//!                                      │
//!                               evaluate rule ──false──▶ Forbidden / logout
//!                                      │
//!                               forge headers ──▶ Allow
//! ```
//!
//! Every failure is local to the request. The configuration snapshot is
//! loaded once at the start so a concurrent reload never mixes versions.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use gatehouse_config::HandlerConf;
use gatehouse_rules::{EvalContext, HeaderForge, ProtectionLevel, RequestScope, Verdict};
use gatehouse_telemetry::metrics::{record_decision, InFlightGuard};
use tracing::Instrument;

use crate::collaborators::Collaborators;
use crate::decision::{Decision, Grant, REMOTE_USER_HEADER};
use crate::error::HandlerResult;
use crate::extract::{ExtractContext, IdentityExtractor};
use crate::request::AccessRequest;
use crate::snapshot::{HandlerSnapshot, VirtualHost};

/// Portal argument for a forbidden request.
pub const FORBIDDEN_ARGS: &str = "lmError=403";
/// Portal argument for a server error.
pub const ERROR_ARGS: &str = "lmError=500";

/// Decides on requests against the current configuration snapshot.
pub struct AccessHandler {
    collaborators: Collaborators,
    current: ArcSwap<HandlerSnapshot>,
}

impl std::fmt::Debug for AccessHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessHandler")
            .field("generation", &self.current.load().generation())
            .finish_non_exhaustive()
    }
}

impl AccessHandler {
    /// Build the first snapshot from `conf`.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or a vhost's rules do not
    /// compile.
    pub fn new(conf: HandlerConf, collaborators: Collaborators) -> HandlerResult<Self> {
        let snapshot = HandlerSnapshot::build(conf, &collaborators, None)?;
        Ok(Self {
            collaborators,
            current: ArcSwap::from_pointee(snapshot),
        })
    }

    /// Compile `conf` and publish it.
    ///
    /// On error the current snapshot keeps serving. Storage and cipher
    /// settings are bound at startup; changing them needs a restart.
    pub fn reload(&self, conf: HandlerConf) -> HandlerResult<()> {
        let previous = self.current.load_full();
        let old = previous.conf();
        if old.global_storage != conf.global_storage
            || old.global_storage_options != conf.global_storage_options
            || old.oidc_storage != conf.oidc_storage
            || old.key != conf.key
        {
            tracing::warn!("session storage or key changed, restart to apply");
        }

        let snapshot = HandlerSnapshot::build(conf, &self.collaborators, Some(&previous))?;
        tracing::info!(generation = snapshot.generation(), "handler configuration reloaded");
        self.current.store(Arc::new(snapshot));
        Ok(())
    }

    /// Snapshot currently serving.
    pub fn snapshot(&self) -> Arc<HandlerSnapshot> {
        self.current.load_full()
    }

    /// Collaborators shared by every snapshot.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Decide on `request`.
    pub async fn handle(&self, request: &AccessRequest) -> Decision {
        let span = tracing::info_span!(
            "request",
            vhost = tracing::field::Empty,
            method = %request.method,
            uri = %request.uri,
            decision = tracing::field::Empty,
        );
        let started = Instant::now();
        let _in_flight = InFlightGuard::new();

        let decision = async {
            let snapshot = self.current.load_full();
            let decision = self.decide(&snapshot, request).await;
            tracing::Span::current().record("decision", decision.kind());
            match &decision {
                Decision::DenyForbidden { .. } => {
                    tracing::info!(decision = decision.kind(), "access denied");
                }
                Decision::ServerError { reason } => {
                    tracing::warn!(reason = %reason, "request failed");
                }
                _ => {
                    gatehouse_telemetry::log_decision!(
                        request.host().unwrap_or_default(),
                        request.uri,
                        decision.kind()
                    );
                }
            }
            decision
        }
        .instrument(span)
        .await;

        record_decision(decision.kind(), started.elapsed());
        decision
    }

    async fn decide(&self, snapshot: &HandlerSnapshot, request: &AccessRequest) -> Decision {
        let Some(host) = request.host() else {
            return Decision::BadRequest {
                reason: "missing Host header".to_string(),
            };
        };
        let vhost = snapshot.vhost(&host);
        tracing::Span::current().record("vhost", vhost.name.as_str());

        if vhost.maintenance {
            return Decision::ServiceUnavailable {
                reason: format!("{} is in maintenance", vhost.name),
            };
        }

        let now = self.collaborators.clock.now();
        // Unconfigured hosts keep their deny-all table.
        let (rules, forge) = if vhost.kind.is_remote() && snapshot.is_configured(&host) {
            let policy = snapshot
                .refresher()
                .policy(&vhost.name, snapshot.compiler(), now.timestamp())
                .await;
            (Arc::clone(&policy.rules), Arc::clone(&policy.forge))
        } else {
            (Arc::clone(&vhost.rules), Arc::clone(&vhost.forge))
        };

        let condition = rules.classify(&request.uri);
        if condition.protection == ProtectionLevel::Skip {
            tracing::debug!(rule = %condition.source, "skip rule matched");
            return Decision::Allow(Grant::skipped());
        }

        if let Some(decision) = cross_domain(snapshot, &vhost, request) {
            return decision;
        }

        let extractor = snapshot.extractors().for_kind(vhost.kind);
        let ctx = ExtractContext {
            vhost: &vhost.name,
            now: now.timestamp(),
            service_token_ttl: i64::try_from(vhost.service_token_ttl).unwrap_or(i64::MAX),
        };
        let Some(identity) = extractor.extract(request, ctx).await else {
            tracing::debug!(extractor = extractor.name(), "no identity in request");
            return extractor.redirect_to_portal(vhost.url(&request.uri), None);
        };
        let source = identity.source;
        let hide = identity.hide.clone();

        let mut session = match extractor
            .retrieve(identity, snapshot.retriever(), now.timestamp())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(source = source.as_str(), error = %e, "no usable session");
                return extractor.redirect_to_portal(vhost.url(&request.uri), None);
            }
        };

        let scope = RequestScope::new(vhost.name.as_str(), request.remote_ip).at(now);
        let verdict = condition.predicate.evaluate(&EvalContext::new(&scope, &session));
        let user = session.user(&snapshot.conf().what_to_trace);

        match verdict {
            Ok(Verdict::Grant) => {}
            Ok(Verdict::Logout(url)) => {
                session.set_logout_url(url);
                tracing::info!(user = user.as_deref().unwrap_or("-"), "logout rule matched");
                return Decision::DenyForbidden {
                    logout_url: session.logout_url().map(str::to_string),
                };
            }
            Ok(Verdict::Deny) => {
                tracing::info!(
                    user = user.as_deref().unwrap_or("-"),
                    rule = %condition.source,
                    "rule refused access"
                );
                if let Some(url) = session.logout_url() {
                    return Decision::DenyForbidden {
                        logout_url: Some(url.to_string()),
                    };
                }
                return forbidden(snapshot, extractor.as_ref(), &vhost, request);
            }
            Err(e) => {
                tracing::warn!(rule = %condition.source, error = %e, "rule evaluation failed");
                return server_error(snapshot, extractor.as_ref(), &vhost, request, e.to_string());
            }
        }

        let headers = match forge_headers(&forge, &scope, &session, user.as_deref()) {
            Ok(headers) => headers,
            Err(e) => {
                tracing::warn!(error = %e, "header forge failed");
                return server_error(snapshot, extractor.as_ref(), &vhost, request, e.to_string());
            }
        };

        Decision::Allow(Grant {
            headers,
            hide: vec![hide],
            user,
            protection: condition.protection,
        })
    }
}

fn forbidden(
    snapshot: &HandlerSnapshot,
    extractor: &dyn IdentityExtractor,
    vhost: &VirtualHost,
    request: &AccessRequest,
) -> Decision {
    if snapshot.conf().use_redirect_on_forbidden {
        extractor.redirect_to_portal(vhost.url(&request.uri), Some(FORBIDDEN_ARGS.to_string()))
    } else {
        Decision::DenyForbidden { logout_url: None }
    }
}

fn server_error(
    snapshot: &HandlerSnapshot,
    extractor: &dyn IdentityExtractor,
    vhost: &VirtualHost,
    request: &AccessRequest,
    reason: String,
) -> Decision {
    if snapshot.conf().use_redirect_on_error {
        extractor.redirect_to_portal(vhost.url(&request.uri), Some(ERROR_ARGS.to_string()))
    } else {
        Decision::ServerError { reason }
    }
}

/// Forged headers followed by `Lm-Remote-User`.
fn forge_headers(
    forge: &HeaderForge,
    scope: &RequestScope,
    session: &crate::session::Session,
    user: Option<&str>,
) -> Result<Vec<(http::HeaderName, String)>, gatehouse_rules::EvalError> {
    let mut headers = forge.forge(&EvalContext::new(scope, session))?;
    headers.retain(|(name, _)| name != REMOTE_USER_HEADER);
    headers.push((REMOTE_USER_HEADER, user.unwrap_or_default().to_string()));
    Ok(headers)
}

/// Cookie handoff when the URI ends with `<cookieName>cda=<id>`.
fn cross_domain(
    snapshot: &HandlerSnapshot,
    vhost: &VirtualHost,
    request: &AccessRequest,
) -> Option<Decision> {
    let pattern = snapshot.cda_pattern()?;
    let captures = pattern.captures(&request.uri)?;
    let whole = captures.get(0)?;
    let session_id = captures.get(1)?.as_str();
    let conf = snapshot.conf();

    let mut cookie = format!("{}={session_id}; path=/", conf.cookie_name);
    if conf.http_only {
        cookie.push_str("; HttpOnly");
    }
    if conf.secured_cookie > 0 {
        cookie.push_str("; secure");
    }

    tracing::debug!(vhost = %vhost.name, "cross-domain cookie handoff");
    Some(Decision::CrossDomain {
        location: vhost.url(&request.uri[..whole.start()]),
        cookie,
    })
}
