//! REST session backend.
//!
//! Talks to the portal's session API: `GET {baseUrl}/{id}` returns the
//! session attributes as a JSON object, `PUT {baseUrl}/{id}` stores them.

use gatehouse_config::StorageOptions;
use reqwest::{Client, StatusCode};
use serde_json::Map;

use super::{Session, SessionStore};
use crate::error::{HandlerError, HandlerResult};
use crate::BoxFuture;

/// Session store backed by an HTTP session API.
#[derive(Debug, Clone)]
pub struct RestSessionStore {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl RestSessionStore {
    /// Create a store for `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
        }
    }

    /// Build from `globalStorageOptions` / `oidcStorageOptions`.
    pub fn from_options(client: Client, options: &StorageOptions) -> HandlerResult<Self> {
        let base_url = options
            .base_url
            .as_deref()
            .ok_or_else(|| HandlerError::store("rest backend needs baseUrl"))?;
        let mut store = Self::new(client, base_url);
        if let Some(user) = &options.user {
            let (name, password) = user.split_once(':').unwrap_or((user.as_str(), ""));
            store.credentials = Some((name.to_string(), password.to_string()));
        }
        Ok(store)
    }

    fn session_url(&self, id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        format!("{}/{encoded}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }
}

impl SessionStore for RestSessionStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, HandlerResult<Option<Session>>> {
        Box::pin(async move {
            let response = self
                .authorize(self.client.get(self.session_url(id)))
                .send()
                .await
                .map_err(|e| HandlerError::store(format!("request failed: {e}")))?;

            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let data: Map<String, serde_json::Value> = response
                        .json()
                        .await
                        .map_err(|e| HandlerError::store(format!("invalid session body: {e}")))?;
                    Ok(Some(Session::new(id, data)))
                }
                status => Err(HandlerError::store(format!("unexpected status {status}"))),
            }
        })
    }

    fn update<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            let response = self
                .authorize(self.client.put(self.session_url(session.id())))
                .json(session.data())
                .send()
                .await
                .map_err(|e| HandlerError::store(format!("request failed: {e}")))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(HandlerError::store(format!(
                    "update rejected with status {}",
                    response.status()
                )))
            }
        })
    }
}
