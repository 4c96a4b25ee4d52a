//! Bearer token introspection.

use std::sync::Arc;

use crate::error::HandlerResult;
use crate::session::SessionStore;
use crate::BoxFuture;

/// Attribute of an access-token record that names the user session.
pub const USER_SESSION_ID: &str = "user_session_id";

/// Maps an OAuth2 access token to a session id.
pub trait TokenResolver: Send + Sync {
    /// Session id bound to `token`, `None` if the token is unknown.
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, HandlerResult<Option<String>>>;
}

/// Reads access-token records from the OIDC session store.
pub struct OidcStoreResolver {
    store: Arc<dyn SessionStore>,
}

impl OidcStoreResolver {
    /// Resolver over the OIDC store.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl TokenResolver for OidcStoreResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, HandlerResult<Option<String>>> {
        Box::pin(async move {
            let Some(record) = self.store.get(token).await? else {
                return Ok(None);
            };
            Ok(record
                .get(USER_SESSION_ID)
                .and_then(serde_json::Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string))
        })
    }
}
