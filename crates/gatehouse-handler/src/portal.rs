//! Portal session-creation collaborator used by the Basic bridge.

use std::time::Duration;

use reqwest::Client;

use crate::error::{HandlerError, HandlerResult};
use crate::BoxFuture;

/// Credentials forwarded to the portal to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreation {
    /// Id the session must be stored under.
    pub session_id: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Encrypted creation time.
    pub secret: String,
    /// Client address chain.
    pub forwarded_for: String,
    /// `(authChoiceParam, value)` when a choice module is forced.
    pub auth_choice: Option<(String, String)>,
}

/// Opens sessions on the portal.
pub trait PortalClient: Send + Sync {
    /// Ask the portal to create the session. Any 2xx answer is success.
    fn create_session<'a>(&'a self, request: &'a SessionCreation) -> BoxFuture<'a, HandlerResult<()>>;
}

/// `POST {portal}/sessions/global/{id}?auth` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPortalClient {
    client: Client,
    portal: String,
}

impl HttpPortalClient {
    /// Client for the portal at `portal`.
    pub fn new(client: Client, portal: impl Into<String>) -> Self {
        Self {
            client,
            portal: portal.into(),
        }
    }

    /// Client with its own connection pool.
    pub fn with_timeout(portal: impl Into<String>, timeout: Duration) -> HandlerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandlerError::portal(format!("failed to create client: {e}")))?;
        Ok(Self::new(client, portal))
    }

    /// Session creation endpoint for `session_id`.
    pub fn endpoint(&self, session_id: &str) -> String {
        let base = self
            .portal
            .split_once('?')
            .map_or(self.portal.as_str(), |(base, _)| base)
            .trim_end_matches('/');
        format!("{base}/sessions/global/{session_id}?auth")
    }
}

impl PortalClient for HttpPortalClient {
    fn create_session<'a>(&'a self, request: &'a SessionCreation) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            let mut form = vec![
                ("user", request.user.as_str()),
                ("password", request.password.as_str()),
                ("secret", request.secret.as_str()),
            ];
            if let Some((param, value)) = &request.auth_choice {
                form.push((param.as_str(), value.as_str()));
            }

            let response = self
                .client
                .post(self.endpoint(&request.session_id))
                .header("x-forwarded-for", &request.forwarded_for)
                .form(&form)
                .send()
                .await
                .map_err(|e| HandlerError::portal(format!("request failed: {e}")))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(HandlerError::portal(format!(
                    "session creation rejected with status {}",
                    response.status()
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let client = HttpPortalClient::new(Client::new(), "http://auth.example.com/");
        assert_eq!(
            client.endpoint("ab12"),
            "http://auth.example.com/sessions/global/ab12?auth"
        );

        let client = HttpPortalClient::new(Client::new(), "https://auth.example.com/index.psgi?lang=en");
        assert_eq!(
            client.endpoint("ab12"),
            "https://auth.example.com/index.psgi/sessions/global/ab12?auth"
        );
    }
}
