//! External collaborators of the handler.
//!
//! Built once at startup from the handler configuration. Embedding
//! applications and tests replace individual collaborators with the
//! `with_*` methods.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_config::{HandlerConf, SessionBackend, StorageOptions};
use gatehouse_rules::FunctionLibrary;
use reqwest::Client;

use crate::clock::{Clock, SystemClock};
use crate::crypto::{AesGcmCipher, Cipher};
use crate::error::{HandlerError, HandlerResult};
use crate::portal::{HttpPortalClient, PortalClient};
use crate::remote::{HttpPolicySource, PolicySource};
use crate::session::{MemorySessionStore, RestSessionStore, SessionStore};
use crate::tokens::{OidcStoreResolver, TokenResolver};

/// Everything the handler talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Primary session store.
    pub sessions: Arc<dyn SessionStore>,
    /// OIDC session store.
    pub oidc_sessions: Option<Arc<dyn SessionStore>>,
    /// Portal session creation.
    pub portal: Arc<dyn PortalClient>,
    /// Shared cipher, absent without a `key`.
    pub cipher: Option<Arc<dyn Cipher>>,
    /// Bearer token resolution.
    pub tokens: Option<Arc<dyn TokenResolver>>,
    /// Remote policy documents.
    pub policies: Arc<dyn PolicySource>,
    /// Custom functions offered to expressions.
    pub functions: FunctionLibrary,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("sessions", &self.sessions.name())
            .field("oidc_sessions", &self.oidc_sessions.as_ref().map(|s| s.name()))
            .field("cipher", &self.cipher.is_some())
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Build the collaborators selected by `conf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid (a session backend
    /// without its options, for instance) or a client cannot be created.
    pub fn from_conf(conf: &HandlerConf, functions: FunctionLibrary) -> HandlerResult<Self> {
        conf.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(conf.collaborator_timeout))
            .build()
            .map_err(|e| HandlerError::store(format!("failed to create client: {e}")))?;

        let sessions = store_for(
            conf.global_storage.unwrap_or(SessionBackend::Memory),
            conf.global_storage_options.as_ref(),
            &client,
        )?;
        let oidc_sessions = conf
            .oidc_storage
            .map(|backend| store_for(backend, conf.oidc_storage_options.as_ref(), &client))
            .transpose()?;
        let tokens = oidc_sessions
            .as_ref()
            .map(|store| Arc::new(OidcStoreResolver::new(Arc::clone(store))) as Arc<dyn TokenResolver>);
        let cipher = conf
            .key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| AesGcmCipher::new(key).map(|c| Arc::new(c) as Arc<dyn Cipher>))
            .transpose()?;

        tracing::info!(
            sessions = sessions.name(),
            oidc = oidc_sessions.as_ref().map(|s| s.name()),
            cipher = cipher.is_some(),
            "handler collaborators ready"
        );

        Ok(Self {
            sessions,
            oidc_sessions,
            portal: Arc::new(HttpPortalClient::new(client.clone(), conf.portal.clone())),
            cipher,
            tokens,
            policies: Arc::new(HttpPolicySource::new(client, conf.loop_back_url.clone())),
            functions,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the primary session store.
    #[must_use]
    pub fn with_sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = store;
        self
    }

    /// Replace the OIDC session store.
    #[must_use]
    pub fn with_oidc_sessions(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.oidc_sessions = Some(store);
        self
    }

    /// Replace the portal client.
    #[must_use]
    pub fn with_portal(mut self, portal: Arc<dyn PortalClient>) -> Self {
        self.portal = portal;
        self
    }

    /// Replace the cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Replace the token resolver.
    #[must_use]
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenResolver>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Replace the remote policy source.
    #[must_use]
    pub fn with_policies(mut self, policies: Arc<dyn PolicySource>) -> Self {
        self.policies = policies;
        self
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn store_for(
    backend: SessionBackend,
    options: Option<&StorageOptions>,
    client: &Client,
) -> HandlerResult<Arc<dyn SessionStore>> {
    Ok(match backend {
        SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
        SessionBackend::Rest => {
            let options = options.ok_or_else(|| HandlerError::store("rest backend needs options"))?;
            Arc::new(RestSessionStore::from_options(client.clone(), options)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_config::ConfigError;

    #[test]
    fn test_default_conf() {
        let collaborators = Collaborators::from_conf(&HandlerConf::default(), FunctionLibrary::new()).unwrap();
        assert_eq!(collaborators.sessions.name(), "memory");
        assert!(collaborators.oidc_sessions.is_none());
        assert!(collaborators.cipher.is_none());
        assert!(collaborators.tokens.is_none());
    }

    #[test]
    fn test_rest_store_and_key() {
        let conf = HandlerConf {
            global_storage: Some(SessionBackend::Rest),
            global_storage_options: Some(StorageOptions {
                base_url: Some("http://auth.example.com/sessions/global".to_string()),
                user: None,
            }),
            oidc_storage: Some(SessionBackend::Memory),
            oidc_storage_options: Some(StorageOptions::default()),
            key: Some("secret".to_string()),
            ..Default::default()
        };
        let collaborators = Collaborators::from_conf(&conf, FunctionLibrary::new()).unwrap();
        assert_eq!(collaborators.sessions.name(), "rest");
        assert!(collaborators.tokens.is_some());
        assert!(collaborators.cipher.is_some());
    }

    #[test]
    fn test_storage_without_options() {
        let conf = HandlerConf {
            global_storage: Some(SessionBackend::Rest),
            ..Default::default()
        };
        let result = Collaborators::from_conf(&conf, FunctionLibrary::new());
        assert!(matches!(
            result,
            Err(HandlerError::Config(ConfigError::MissingStorageOptions { .. }))
        ));
    }
}
