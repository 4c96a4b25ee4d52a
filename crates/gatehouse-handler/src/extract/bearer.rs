//! OAuth2 bearer tokens.

use std::sync::Arc;
use std::time::Duration;

use http::header::AUTHORIZATION;

use super::{
    authorization_credentials, CookieExtractor, ExtractContext, ExtractedIdentity,
    IdentityExtractor, IdentitySource,
};
use crate::decision::Hidden;
use crate::error::HandlerResult;
use crate::request::AccessRequest;
use crate::session::{Session, SessionRetriever};
use crate::tokens::TokenResolver;
use crate::BoxFuture;

/// Maps `Authorization: Bearer` tokens to sessions, falling back to the cookie.
pub struct BearerExtractor {
    resolver: Option<Arc<dyn TokenResolver>>,
    oidc: Option<SessionRetriever>,
    cookie: CookieExtractor,
    deadline: Duration,
}

impl BearerExtractor {
    /// Extractor using `resolver` for tokens and `oidc` as the preferred store.
    pub fn new(
        resolver: Option<Arc<dyn TokenResolver>>,
        oidc: Option<SessionRetriever>,
        cookie: CookieExtractor,
        deadline: Duration,
    ) -> Self {
        Self {
            resolver,
            oidc,
            cookie,
            deadline,
        }
    }

    async fn resolve(&self, token: &str) -> Option<String> {
        let resolver = self.resolver.as_ref()?;
        match tokio::time::timeout(self.deadline, resolver.resolve(token)).await {
            Ok(Ok(Some(id))) => Some(id),
            Ok(Ok(None)) => {
                tracing::debug!("unknown bearer token");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "token resolution failed");
                None
            }
            Err(_) => {
                tracing::warn!("token resolution timed out");
                None
            }
        }
    }
}

impl IdentityExtractor for BearerExtractor {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn extract<'a>(
        &'a self,
        request: &'a AccessRequest,
        _ctx: ExtractContext<'a>,
    ) -> BoxFuture<'a, Option<ExtractedIdentity>> {
        Box::pin(async move {
            if let Some(token) = authorization_credentials(request, "Bearer") {
                if let Some(session_id) = self.resolve(token).await {
                    return Some(ExtractedIdentity {
                        session_id,
                        source: IdentitySource::Bearer,
                        hide: Hidden::Header(AUTHORIZATION),
                        pending: None,
                    });
                }
            }
            self.cookie.identity(request)
        })
    }

    fn retrieve<'a>(
        &'a self,
        identity: ExtractedIdentity,
        retriever: &'a SessionRetriever,
        now: i64,
    ) -> BoxFuture<'a, HandlerResult<Session>> {
        Box::pin(async move {
            if identity.source == IdentitySource::Bearer {
                if let Some(oidc) = &self.oidc {
                    match oidc.retrieve(&identity.session_id, now).await {
                        Ok(session) => return Ok(session),
                        Err(e) => tracing::debug!(error = %e, "not in the OIDC store"),
                    }
                }
            }
            retriever.retrieve(&identity.session_id, now).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::session::MemorySessionStore;
    use http::Method;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    /// Resolver over a fixed token list; `broken` fails, `slow` never answers.
    struct FakeTokens;

    impl TokenResolver for FakeTokens {
        fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, HandlerResult<Option<String>>> {
            Box::pin(async move {
                match token {
                    "at-1" => Ok(Some("sess-1".to_string())),
                    "at-2" => Ok(Some("sess-2".to_string())),
                    "broken" => Err(HandlerError::store("token backend down")),
                    "slow" => std::future::pending().await,
                    _ => Ok(None),
                }
            })
        }
    }

    fn store(entries: &[(&str, &str)]) -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        for (id, uid) in entries {
            let serde_json::Value::Object(map) = json!({"uid": uid, "_utime": NOW - 10}) else {
                unreachable!()
            };
            store.insert(*id, map);
        }
        store
    }

    fn retriever(store: Arc<MemorySessionStore>) -> SessionRetriever {
        SessionRetriever::new(store, 7200, None, Duration::from_secs(1))
    }

    fn extractor(
        resolver: Option<Arc<dyn TokenResolver>>,
        oidc: Option<SessionRetriever>,
    ) -> BearerExtractor {
        BearerExtractor::new(
            resolver,
            oidc,
            CookieExtractor::new("lemonldap").unwrap(),
            Duration::from_secs(1),
        )
    }

    fn ctx() -> ExtractContext<'static> {
        ExtractContext {
            vhost: "app.example.com",
            now: NOW,
            service_token_ttl: 30,
        }
    }

    fn request(token: &str) -> AccessRequest {
        AccessRequest::new(Method::GET, "/")
            .with_header("authorization", &format!("Bearer {token}"))
            .with_header("cookie", "lemonldap=cookie-session")
    }

    #[tokio::test]
    async fn test_token_maps_to_session() {
        let bearer = extractor(Some(Arc::new(FakeTokens)), None);
        let identity = bearer.extract(&request("at-1"), ctx()).await.unwrap();
        assert_eq!(identity.session_id, "sess-1");
        assert_eq!(identity.source, IdentitySource::Bearer);
        assert_eq!(identity.hide, Hidden::Header(AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_unusable_tokens_fall_back_to_cookie() {
        let bearer = extractor(Some(Arc::new(FakeTokens)), None);
        for token in ["unknown", "broken"] {
            let identity = bearer.extract(&request(token), ctx()).await.unwrap();
            assert_eq!(identity.session_id, "cookie-session", "{token}");
            assert_eq!(identity.source, IdentitySource::Cookie);
            assert_eq!(identity.hide, Hidden::Cookie("lemonldap".to_string()));
        }

        let without_resolver = extractor(None, None);
        let identity = without_resolver.extract(&request("at-1"), ctx()).await.unwrap();
        assert_eq!(identity.source, IdentitySource::Cookie);

        let bare =
            AccessRequest::new(Method::GET, "/").with_header("authorization", "Bearer unknown");
        assert!(bearer.extract(&bare, ctx()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_timeout_falls_back_to_cookie() {
        let bearer = extractor(Some(Arc::new(FakeTokens)), None);
        let identity = bearer.extract(&request("slow"), ctx()).await.unwrap();
        assert_eq!(identity.session_id, "cookie-session");
        assert_eq!(identity.source, IdentitySource::Cookie);
    }

    #[tokio::test]
    async fn test_oidc_store_is_tried_first() {
        let oidc = retriever(store(&[("sess-1", "oidc-user")]));
        let primary = retriever(store(&[
            ("sess-1", "primary-user"),
            ("sess-2", "primary-user"),
            ("cookie-session", "cookie-user"),
        ]));
        let bearer = extractor(Some(Arc::new(FakeTokens)), Some(oidc));

        let identity = bearer.extract(&request("at-1"), ctx()).await.unwrap();
        let session = bearer.retrieve(identity, &primary, NOW).await.unwrap();
        assert_eq!(session.user("uid").as_deref(), Some("oidc-user"));

        let identity = bearer.extract(&request("at-2"), ctx()).await.unwrap();
        let session = bearer.retrieve(identity, &primary, NOW).await.unwrap();
        assert_eq!(session.user("uid").as_deref(), Some("primary-user"));

        let identity = bearer.extract(&request("unknown"), ctx()).await.unwrap();
        let session = bearer.retrieve(identity, &primary, NOW).await.unwrap();
        assert_eq!(session.user("uid").as_deref(), Some("cookie-user"));
    }

    #[tokio::test]
    async fn test_cookie_identity_skips_oidc_store() {
        let oidc = retriever(store(&[("cookie-session", "oidc-user")]));
        let primary = retriever(store(&[]));
        let bearer = extractor(None, Some(oidc));

        let identity = bearer.extract(&request("at-1"), ctx()).await.unwrap();
        let result = bearer.retrieve(identity, &primary, NOW).await;
        assert!(matches!(result, Err(HandlerError::SessionNotFound)));
    }
}
