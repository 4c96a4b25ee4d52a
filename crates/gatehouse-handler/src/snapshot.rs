//! Immutable, atomically published handler configuration.
//!
//! A [`HandlerSnapshot`] holds everything compiled from one configuration:
//! one [`VirtualHost`] per configured host, the alias map, the extractors
//! and the remote policy cache. Requests load the current snapshot once and
//! use it to the end, so a reload never shows a half-built state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_config::{HandlerConf, HandlerKind};
use gatehouse_rules::{ConditionCompiler, HeaderForge, RuleResult, RuleTable};
use regex::Regex;

use crate::collaborators::Collaborators;
use crate::crypto::CipherEncryptor;
use crate::error::{HandlerError, HandlerResult};
use crate::extract::{
    BasicBridge, BearerExtractor, CookieExtractor, ExtractorSet, ServiceTokenExtractor,
};
use crate::remote::RemotePolicyRefresher;
use crate::session::SessionRetriever;

/// Compiled settings of one virtual host.
#[derive(Debug, Clone)]
pub struct VirtualHost {
    /// Canonical name.
    pub name: String,
    /// Answer 503.
    pub maintenance: bool,
    /// Scheme of redirect URLs.
    pub https: bool,
    /// Port of redirect URLs, `None` for the scheme default.
    pub port: Option<u16>,
    /// Strategy set.
    pub kind: HandlerKind,
    /// Location rules.
    pub rules: Arc<RuleTable>,
    /// Exported headers.
    pub forge: Arc<HeaderForge>,
    /// Service token lifetime, seconds.
    pub service_token_ttl: u64,
}

impl VirtualHost {
    /// Compile `name` from `conf`.
    pub fn compile(name: &str, conf: &HandlerConf, compiler: &ConditionCompiler) -> RuleResult<Self> {
        let empty = indexmap::IndexMap::new();
        let rules = RuleTable::compile(
            compiler,
            conf.location_rules.get(name).unwrap_or(&empty),
            name,
        )?;
        let forge = HeaderForge::compile(compiler, conf.exported_headers.get(name).unwrap_or(&empty))?;
        Ok(Self::with_tables(name, conf, rules, forge))
    }

    /// Host with no configuration: every authenticated request is refused.
    pub fn unknown(name: &str, conf: &HandlerConf) -> Self {
        Self::with_tables(name, conf, RuleTable::deny_all(), HeaderForge::empty())
    }

    fn with_tables(name: &str, conf: &HandlerConf, rules: RuleTable, forge: HeaderForge) -> Self {
        let options = conf.options_for(name);
        Self {
            name: name.to_string(),
            maintenance: options.vhost_maintenance || conf.maintenance,
            https: options.vhost_https.or(conf.https).unwrap_or(false),
            port: options.vhost_port.or(conf.port),
            kind: conf.kind_for(name),
            rules: Arc::new(rules),
            forge: Arc::new(forge),
            service_token_ttl: conf.service_token_ttl_for(name),
        }
    }

    /// Absolute URL of `uri` on this host.
    pub fn url(&self, uri: &str) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let default_port = if self.https { 443 } else { 80 };
        match self.port {
            Some(port) if port != default_port => format!("{scheme}://{}:{port}{uri}", self.name),
            _ => format!("{scheme}://{}{uri}", self.name),
        }
    }
}

/// Everything compiled from one handler configuration.
#[derive(Debug)]
pub struct HandlerSnapshot {
    conf: Arc<HandlerConf>,
    compiler: ConditionCompiler,
    vhosts: HashMap<String, Arc<VirtualHost>>,
    aliases: HashMap<String, String>,
    extractors: ExtractorSet,
    retriever: SessionRetriever,
    refresher: RemotePolicyRefresher,
    cda: Option<Regex>,
    generation: u64,
}

impl HandlerSnapshot {
    /// Compile `conf`.
    ///
    /// A vhost whose rules fail to compile keeps its entry from `previous`
    /// when there is one; otherwise the whole build fails.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Config` for invalid settings and
    /// `HandlerError::Rules` for a vhost that cannot be compiled.
    pub fn build(
        conf: HandlerConf,
        collaborators: &Collaborators,
        previous: Option<&Self>,
    ) -> HandlerResult<Self> {
        conf.validate()?;

        let (mut library, missing) = collaborators
            .functions
            .restrict_to(&conf.custom_function_names());
        for name in missing {
            tracing::warn!(function = %name, "custom function is not registered");
        }
        if let Some(cipher) = &collaborators.cipher {
            library = library.with_encryptor(Arc::new(CipherEncryptor(Arc::clone(cipher))));
        }
        let compiler = ConditionCompiler::new(library, conf.portal.clone());

        let mut vhosts = HashMap::new();
        for name in conf.vhosts() {
            let vhost = match VirtualHost::compile(&name, &conf, &compiler) {
                Ok(vhost) => Arc::new(vhost),
                Err(source) => match previous.and_then(|p| p.vhosts.get(&name)) {
                    Some(kept) => {
                        tracing::error!(vhost = %name, error = %source, "rules rejected, keeping previous version");
                        Arc::clone(kept)
                    }
                    None => {
                        tracing::error!(vhost = %name, error = %source, "rules rejected");
                        return Err(HandlerError::Rules {
                            vhost: name,
                            source,
                        });
                    }
                },
            };
            vhosts.insert(name.to_ascii_lowercase(), vhost);
        }

        let aliases = conf
            .alias_map()
            .into_iter()
            .map(|(alias, vhost)| (alias.to_ascii_lowercase(), vhost.to_ascii_lowercase()))
            .collect();

        let deadline = Duration::from_secs(conf.collaborator_timeout);
        let retriever = SessionRetriever::from_conf(Arc::clone(&collaborators.sessions), &conf);
        let extractors = build_extractors(&conf, collaborators, deadline)?;
        let refresher = RemotePolicyRefresher::new(Arc::clone(&collaborators.policies), deadline);

        let cda = if conf.cda {
            let pattern = format!(r"(?i)[?&;]{}cda=(\w+)$", regex::escape(&conf.cookie_name));
            Some(Regex::new(&pattern).map_err(|e| {
                gatehouse_config::ConfigError::invalid_value("handler.cda", e.to_string())
            })?)
        } else {
            None
        };

        let generation = previous.map_or(0, |p| p.generation + 1);
        tracing::info!(
            generation,
            vhosts = vhosts.len(),
            aliases = conf.alias_map().len(),
            "handler snapshot built"
        );

        Ok(Self {
            conf: Arc::new(conf),
            compiler,
            vhosts,
            aliases,
            extractors,
            retriever,
            refresher,
            cda,
            generation,
        })
    }

    /// The configuration this snapshot was built from.
    pub fn conf(&self) -> &HandlerConf {
        &self.conf
    }

    /// Compiler for remote policies.
    pub fn compiler(&self) -> &ConditionCompiler {
        &self.compiler
    }

    /// Canonical name of `host`, aliases resolved.
    pub fn canonical<'a>(&'a self, host: &'a str) -> &'a str {
        self.aliases.get(host).map_or(host, String::as_str)
    }

    /// Virtual host for `host`. Unknown hosts get a deny-all entry.
    pub fn vhost(&self, host: &str) -> Arc<VirtualHost> {
        let name = self.canonical(host);
        self.vhosts.get(name).map_or_else(
            || {
                tracing::debug!(vhost = %name, "no configuration for vhost");
                Arc::new(VirtualHost::unknown(name, &self.conf))
            },
            Arc::clone,
        )
    }

    /// Whether `host` is configured, directly or as an alias.
    pub fn is_configured(&self, host: &str) -> bool {
        self.vhosts.contains_key(self.canonical(host))
    }

    /// Configured canonical vhost names.
    pub fn vhost_names(&self) -> impl Iterator<Item = &str> {
        self.vhosts.keys().map(String::as_str)
    }

    /// Extractors of this snapshot.
    pub fn extractors(&self) -> &ExtractorSet {
        &self.extractors
    }

    /// Session retrieval policy.
    pub fn retriever(&self) -> &SessionRetriever {
        &self.retriever
    }

    /// Remote policy cache.
    pub fn refresher(&self) -> &RemotePolicyRefresher {
        &self.refresher
    }

    /// Cross-domain parameter pattern, when enabled.
    pub fn cda_pattern(&self) -> Option<&Regex> {
        self.cda.as_ref()
    }

    /// Number of reloads before this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn build_extractors(
    conf: &HandlerConf,
    collaborators: &Collaborators,
    deadline: Duration,
) -> HandlerResult<ExtractorSet> {
    let cookie = CookieExtractor::new(&conf.cookie_name)?;

    let mut basic = BasicBridge::new(
        conf.key.clone().unwrap_or_default(),
        conf.timeout,
        Arc::clone(&collaborators.portal),
        collaborators.cipher.clone(),
        deadline,
    );
    if let Some(choice) = &conf.auth_choice_auth_basic {
        basic = basic.with_auth_choice(conf.auth_choice_param.clone(), choice.clone());
    }

    let oidc = collaborators
        .oidc_sessions
        .as_ref()
        .map(|store| SessionRetriever::from_conf(Arc::clone(store), conf));
    let bearer = BearerExtractor::new(collaborators.tokens.clone(), oidc, cookie.clone(), deadline);
    let service_token = ServiceTokenExtractor::new(collaborators.cipher.clone(), cookie.clone());

    Ok(ExtractorSet {
        cookie: Arc::new(cookie),
        basic: Arc::new(basic),
        bearer: Arc::new(bearer),
        service_token: Arc::new(service_token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_config::VhostOptions;
    use gatehouse_rules::{FunctionLibrary, Predicate, ProtectionLevel};
    use indexmap::IndexMap;

    fn conf() -> HandlerConf {
        let mut rules = IndexMap::new();
        rules.insert("^/admin".to_string(), "$uid eq 'root'".to_string());
        rules.insert("^/static".to_string(), "skip".to_string());
        rules.insert("default".to_string(), "accept".to_string());

        let mut conf = HandlerConf::default();
        conf.location_rules.insert("app.example.com".to_string(), rules);
        conf.vhost_options.insert(
            "app.example.com".to_string(),
            VhostOptions {
                vhost_aliases: "www.example.com app2.example.com".to_string(),
                vhost_https: Some(true),
                ..Default::default()
            },
        );
        conf
    }

    fn collaborators() -> Collaborators {
        Collaborators::from_conf(&HandlerConf::default(), FunctionLibrary::new()).unwrap()
    }

    #[test]
    fn test_build_and_resolve() {
        let snapshot = HandlerSnapshot::build(conf(), &collaborators(), None).unwrap();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.is_configured("app.example.com"));
        assert!(snapshot.is_configured("www.example.com"));

        let vhost = snapshot.vhost("app2.example.com");
        assert_eq!(vhost.name, "app.example.com");
        assert_eq!(vhost.url("/x?y=1"), "https://app.example.com/x?y=1");
        assert_eq!(
            vhost.rules.classify("/static/app.css").protection,
            ProtectionLevel::Skip
        );
    }

    #[test]
    fn test_unknown_vhost_denies() {
        let snapshot = HandlerSnapshot::build(conf(), &collaborators(), None).unwrap();
        let vhost = snapshot.vhost("other.example.com");
        assert!(matches!(vhost.rules.classify("/").predicate, Predicate::Deny));
        assert!(!snapshot.is_configured("other.example.com"));
    }

    #[test]
    fn test_url_ports() {
        let mut conf = conf();
        conf.port = Some(8080);
        let snapshot = HandlerSnapshot::build(conf, &collaborators(), None).unwrap();
        assert_eq!(
            snapshot.vhost("app.example.com").url("/"),
            "https://app.example.com:8080/"
        );

        let mut conf = HandlerConf::default();
        conf.port = Some(80);
        let vhost = VirtualHost::unknown("plain.example.com", &conf);
        assert_eq!(vhost.url("/"), "http://plain.example.com/");
    }

    #[test]
    fn test_bad_rule_without_previous_fails() {
        let mut conf = conf();
        conf.location_rules["app.example.com"].insert("^/x".to_string(), "$uid eq".to_string());
        let result = HandlerSnapshot::build(conf, &collaborators(), None);
        assert!(matches!(result, Err(HandlerError::Rules { vhost, .. }) if vhost == "app.example.com"));
    }

    #[test]
    fn test_bad_rule_keeps_previous_vhost() {
        let collaborators = collaborators();
        let first = HandlerSnapshot::build(conf(), &collaborators, None).unwrap();

        let mut broken = conf();
        broken.location_rules["app.example.com"].insert("^/x".to_string(), "$uid eq".to_string());
        let mut other = IndexMap::new();
        other.insert("default".to_string(), "deny".to_string());
        broken.location_rules.insert("new.example.com".to_string(), other);

        let second = HandlerSnapshot::build(broken, &collaborators, Some(&first)).unwrap();
        assert_eq!(second.generation(), 1);
        assert!(Arc::ptr_eq(
            &first.vhost("app.example.com"),
            &second.vhost("app.example.com")
        ));
        assert!(second.is_configured("new.example.com"));
    }

    #[test]
    fn test_unregistered_custom_function_rejected() {
        let mut conf = conf();
        conf.custom_functions = "inGroup".to_string();
        conf.location_rules["app.example.com"]
            .insert("^/team".to_string(), "inGroup('ops')".to_string());
        assert!(HandlerSnapshot::build(conf.clone(), &collaborators(), None).is_err());

        let mut library = FunctionLibrary::new();
        library.register("inGroup", |_args: &[gatehouse_rules::Value]| {
            Ok(gatehouse_rules::Value::Bool(true))
        });
        let collaborators = collaborators().clone();
        let collaborators = Collaborators {
            functions: library,
            ..collaborators
        };
        assert!(HandlerSnapshot::build(conf, &collaborators, None).is_ok());
    }

    #[test]
    fn test_cda_pattern() {
        let mut conf = conf();
        conf.cda = true;
        let snapshot = HandlerSnapshot::build(conf, &collaborators(), None).unwrap();
        let pattern = snapshot.cda_pattern().unwrap();
        let caps = pattern.captures("/page?x=1&lemonldapcda=abc123").unwrap();
        assert_eq!(&caps[1], "abc123");
        assert!(pattern.captures("/page?lemonldapcda=abc&x=1").is_none());
    }
}
