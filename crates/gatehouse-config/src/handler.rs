//! Access-control handler configuration.
//!
//! Keys use the camelCase names of the LemonLDAP::NG configuration so that an
//! exported `lmConf` JSON document can be used as the `[handler]` section
//! as-is. Unknown keys are ignored for the same reason: a full portal
//! configuration carries many settings the handler never reads.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Ordered `pattern → condition` or `header → expression` map.
pub type OrderedMap = IndexMap<String, String>;

/// Strategy set used for a virtual host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum HandlerKind {
    /// Cookie sessions.
    #[default]
    Main,
    /// HTTP Basic bridged to portal sessions.
    AuthBasic,
    /// OAuth2 / OIDC bearer tokens, cookie fallback.
    OAuth2,
    /// Encrypted inter-service tokens, cookie fallback.
    ServiceToken,
    /// Rules fetched from the protected application.
    DevOps,
    /// `DevOps` rules with service tokens.
    #[serde(rename = "DevOpsST")]
    DevOpsSt,
}

impl HandlerKind {
    /// Whether rules are fetched from the application.
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::DevOps | Self::DevOpsSt)
    }

    /// Whether service tokens are accepted.
    pub const fn accepts_service_tokens(self) -> bool {
        matches!(self, Self::ServiceToken | Self::DevOpsSt)
    }
}

/// Session backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// In-process store.
    Memory,
    /// REST session API of the portal.
    #[serde(alias = "Apache::Session::REST")]
    Rest,
}

/// Options of a session backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageOptions {
    /// Base URL of the REST session API.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Basic credentials for the REST session API, as `user:password`.
    #[serde(default)]
    pub user: Option<String>,
}

/// Per-vhost options (`vhostOptions.<vhost>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct VhostOptions {
    /// Answer 503 for this vhost.
    pub vhost_maintenance: bool,
    /// Force the scheme used in redirect URLs.
    pub vhost_https: Option<bool>,
    /// Force the port used in redirect URLs.
    pub vhost_port: Option<u16>,
    /// Space separated alternative host names.
    pub vhost_aliases: String,
    /// Handler kind, overriding `handlerType`.
    pub vhost_type: Option<HandlerKind>,
    /// Service token lifetime in seconds, overriding `serviceTokenTtl`.
    #[serde(rename = "vhostServiceTokenTTL")]
    pub vhost_service_token_ttl: Option<u64>,
}

impl VhostOptions {
    /// Alias host names.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.vhost_aliases.split_whitespace()
    }
}

/// Handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HandlerConf {
    /// Session cookie name.
    pub cookie_name: String,
    /// Session lifetime in seconds.
    pub timeout: u64,
    /// Inactivity timeout in seconds, `0` disables it.
    pub timeout_activity: u64,
    /// `HttpOnly` on cookies set by the handler.
    pub http_only: bool,
    /// `0` plain cookies, anything else adds `Secure`.
    pub secured_cookie: u8,
    /// Redirect to the portal with `lmError=500` instead of answering 500.
    pub use_redirect_on_error: bool,
    /// Redirect to the portal with `lmError=403` instead of answering 403.
    pub use_redirect_on_forbidden: bool,
    /// Session attribute exported as `Lm-Remote-User`.
    pub what_to_trace: String,
    /// Portal URL.
    pub portal: String,
    /// Cross-domain authentication.
    pub cda: bool,
    /// SSO cookie domain.
    pub domain: String,
    /// `locationRules[vhost]`.
    pub location_rules: IndexMap<String, OrderedMap>,
    /// `exportedHeaders[vhost]`.
    pub exported_headers: IndexMap<String, OrderedMap>,
    /// `vhostOptions[vhost]`.
    pub vhost_options: IndexMap<String, VhostOptions>,
    /// Answer 503 for every vhost.
    pub maintenance: bool,
    /// Scheme used in redirect URLs.
    pub https: Option<bool>,
    /// Port used in redirect URLs.
    pub port: Option<u16>,
    /// Primary session backend; in-memory when unset.
    pub global_storage: Option<SessionBackend>,
    /// Options of the primary session backend.
    pub global_storage_options: Option<StorageOptions>,
    /// OIDC session backend.
    pub oidc_storage: Option<SessionBackend>,
    /// Options of the OIDC session backend.
    pub oidc_storage_options: Option<StorageOptions>,
    /// Shared secret for the cipher and the Basic bridge.
    pub key: Option<String>,
    /// Base URL used to fetch `rules.json`.
    pub loop_back_url: String,
    /// Space separated custom function names callable from rules.
    pub custom_functions: String,
    /// Default handler kind.
    pub handler_type: HandlerKind,
    /// Service token lifetime in seconds.
    #[serde(rename = "serviceTokenTTL", alias = "serviceTokenTtl")]
    pub service_token_ttl: u64,
    /// Name of the portal's authentication choice parameter.
    pub auth_choice_param: String,
    /// Authentication choice sent by the Basic bridge.
    pub auth_choice_auth_basic: Option<String>,
    /// Bound on every collaborator call, in seconds.
    pub collaborator_timeout: u64,
}

impl Default for HandlerConf {
    fn default() -> Self {
        Self {
            cookie_name: "lemonldap".to_string(),
            timeout: 72_000,
            timeout_activity: 0,
            http_only: true,
            secured_cookie: 0,
            use_redirect_on_error: true,
            use_redirect_on_forbidden: false,
            what_to_trace: "uid".to_string(),
            portal: "http://auth.example.com/".to_string(),
            cda: false,
            domain: "example.com".to_string(),
            location_rules: IndexMap::new(),
            exported_headers: IndexMap::new(),
            vhost_options: IndexMap::new(),
            maintenance: false,
            https: None,
            port: None,
            global_storage: None,
            global_storage_options: None,
            oidc_storage: None,
            oidc_storage_options: None,
            key: None,
            loop_back_url: "http://127.0.0.1".to_string(),
            custom_functions: String::new(),
            handler_type: HandlerKind::Main,
            service_token_ttl: 30,
            auth_choice_param: "lmAuth".to_string(),
            auth_choice_auth_basic: None,
            collaborator_timeout: 5,
        }
    }
}

impl HandlerConf {
    /// Every configured vhost, in first-seen order.
    pub fn vhosts(&self) -> Vec<String> {
        let mut seen = IndexMap::new();
        for vhost in self
            .location_rules
            .keys()
            .chain(self.exported_headers.keys())
            .chain(self.vhost_options.keys())
        {
            seen.entry(vhost.clone()).or_insert(());
        }
        seen.into_keys().collect()
    }

    /// Options of `vhost`, or defaults.
    pub fn options_for(&self, vhost: &str) -> VhostOptions {
        self.vhost_options.get(vhost).cloned().unwrap_or_default()
    }

    /// Handler kind of `vhost`.
    pub fn kind_for(&self, vhost: &str) -> HandlerKind {
        self.vhost_options
            .get(vhost)
            .and_then(|o| o.vhost_type)
            .unwrap_or(self.handler_type)
    }

    /// Service token lifetime for `vhost`.
    pub fn service_token_ttl_for(&self, vhost: &str) -> u64 {
        self.vhost_options
            .get(vhost)
            .and_then(|o| o.vhost_service_token_ttl)
            .unwrap_or(self.service_token_ttl)
    }

    /// `alias → canonical vhost`.
    pub fn alias_map(&self) -> HashMap<String, String> {
        self.vhost_options
            .iter()
            .flat_map(|(vhost, options)| {
                options
                    .aliases()
                    .map(move |alias| (alias.to_string(), vhost.clone()))
            })
            .collect()
    }

    /// Custom function names allowed in expressions.
    pub fn custom_function_names(&self) -> Vec<String> {
        self.custom_functions
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Whether an inactivity timeout applies.
    pub const fn has_activity_timeout(&self) -> bool {
        self.timeout_activity > 0
    }

    /// Validate the handler settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.portal.starts_with("http://") && !self.portal.starts_with("https://") {
            return Err(ConfigError::invalid_value(
                "handler.portal",
                format!("must be an absolute http(s) URL: {}", self.portal),
            ));
        }

        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid_value(
                "handler.cookieName",
                format!("invalid cookie name: {:?}", self.cookie_name),
            ));
        }

        if self.timeout == 0 {
            return Err(ConfigError::invalid_value(
                "handler.timeout",
                "must be greater than zero",
            ));
        }

        if self.collaborator_timeout == 0 {
            return Err(ConfigError::invalid_value(
                "handler.collaboratorTimeout",
                "must be greater than zero",
            ));
        }

        check_storage(
            self.global_storage,
            self.global_storage_options.as_ref(),
            "globalStorage",
            "globalStorageOptions",
        )?;
        check_storage(
            self.oidc_storage,
            self.oidc_storage_options.as_ref(),
            "oidcStorage",
            "oidcStorageOptions",
        )?;

        Ok(())
    }
}

fn check_storage(
    backend: Option<SessionBackend>,
    options: Option<&StorageOptions>,
    backend_key: &'static str,
    options_key: &'static str,
) -> Result<(), ConfigError> {
    let Some(backend) = backend else {
        return Ok(());
    };
    let options = options.ok_or(ConfigError::MissingStorageOptions {
        backend: backend_key,
        options: options_key,
    })?;
    if backend == SessionBackend::Rest && options.base_url.is_none() {
        return Err(ConfigError::invalid_value(
            format!("handler.{options_key}.baseUrl"),
            "required by the rest backend",
        ));
    }
    Ok(())
}
