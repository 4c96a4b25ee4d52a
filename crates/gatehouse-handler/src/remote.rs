//! Remote policy refresh for `DevOps` virtual hosts.
//!
//! The protected application publishes its own rules at
//! `{loopBackUrl}/rules.json`:
//!
//! ```json
//! { "rules": { "^/admin": "$uid eq 'root'", "default": "accept" },
//!   "headers": { "Auth-User": "$uid" } }
//! ```
//!
//! Policies are cached per vhost for [`POLICY_TTL`] seconds. A stale vhost is
//! refreshed by a single request; concurrent requests for the same vhost
//! wait on a per-vhost lock and reuse the result. Fetch or compile failures
//! publish a permissive policy so the application stays reachable.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use gatehouse_rules::{ConditionCompiler, HeaderForge, RuleTable};
use gatehouse_telemetry::metrics::record_policy_refresh;
use http::header::HOST;
use indexmap::IndexMap;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{HandlerError, HandlerResult};
use crate::BoxFuture;

/// Seconds a fetched policy stays fresh.
pub const POLICY_TTL: i64 = 600;

/// Policy document served by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyDocument {
    /// Location rules, `default` included.
    #[serde(default)]
    pub rules: IndexMap<String, String>,
    /// Exported headers.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

/// Where policy documents come from.
pub trait PolicySource: Send + Sync {
    /// Fetch the document of `vhost`.
    fn fetch<'a>(&'a self, vhost: &'a str) -> BoxFuture<'a, HandlerResult<PolicyDocument>>;
}

/// `GET {loopBackUrl}/rules.json` with `Host: <vhost>`.
#[derive(Debug, Clone)]
pub struct HttpPolicySource {
    client: Client,
    loopback: String,
}

impl HttpPolicySource {
    /// Source querying `loopback`.
    pub fn new(client: Client, loopback: impl Into<String>) -> Self {
        Self {
            client,
            loopback: loopback.into().trim_end_matches('/').to_string(),
        }
    }

    /// Document URL.
    pub fn url(&self) -> String {
        format!("{}/rules.json", self.loopback)
    }
}

impl PolicySource for HttpPolicySource {
    fn fetch<'a>(&'a self, vhost: &'a str) -> BoxFuture<'a, HandlerResult<PolicyDocument>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url())
                .header(HOST, vhost)
                .send()
                .await
                .map_err(|e| HandlerError::remote_policy(vhost, format!("request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(HandlerError::remote_policy(
                    vhost,
                    format!("unexpected status {}", response.status()),
                ));
            }
            response
                .json()
                .await
                .map_err(|e| HandlerError::remote_policy(vhost, format!("invalid document: {e}")))
        })
    }
}

/// A compiled remote policy.
#[derive(Debug, Clone)]
pub struct RemotePolicy {
    /// Location rules.
    pub rules: Arc<RuleTable>,
    /// Exported headers.
    pub forge: Arc<HeaderForge>,
    /// When it was fetched.
    pub fetched_at: i64,
    /// Whether this is the permissive fallback.
    pub fail_open: bool,
}

impl RemotePolicy {
    fn permissive(now: i64) -> Self {
        Self {
            rules: Arc::new(RuleTable::permissive()),
            forge: Arc::new(HeaderForge::empty()),
            fetched_at: now,
            fail_open: true,
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        now - self.fetched_at < POLICY_TTL
    }
}

/// Per-vhost cache of remote policies.
pub struct RemotePolicyRefresher {
    source: Arc<dyn PolicySource>,
    cache: DashMap<String, Arc<RemotePolicy>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    deadline: Duration,
}

impl std::fmt::Debug for RemotePolicyRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePolicyRefresher")
            .field("cached", &self.cache.len())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RemotePolicyRefresher {
    /// Empty cache over `source`; each fetch is bounded by `deadline`.
    pub fn new(source: Arc<dyn PolicySource>, deadline: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            locks: DashMap::new(),
            deadline,
        }
    }

    /// Current policy of `vhost`, refreshed when stale.
    pub async fn policy(
        &self,
        vhost: &str,
        compiler: &ConditionCompiler,
        now: i64,
    ) -> Arc<RemotePolicy> {
        if let Some(policy) = self.fresh(vhost, now) {
            return policy;
        }

        let lock = self.locks.entry(vhost.to_string()).or_default().clone();
        let _guard = lock.lock().await;
        if let Some(policy) = self.fresh(vhost, now) {
            return policy;
        }

        let policy = Arc::new(self.load(vhost, compiler, now).await);
        self.cache.insert(vhost.to_string(), Arc::clone(&policy));
        policy
    }

    /// Cached policy of `vhost`, fresh or not.
    pub fn cached(&self, vhost: &str) -> Option<Arc<RemotePolicy>> {
        self.cache.get(vhost).map(|entry| Arc::clone(entry.value()))
    }

    fn fresh(&self, vhost: &str, now: i64) -> Option<Arc<RemotePolicy>> {
        self.cache
            .get(vhost)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| Arc::clone(entry.value()))
    }

    async fn load(&self, vhost: &str, compiler: &ConditionCompiler, now: i64) -> RemotePolicy {
        let document = match tokio::time::timeout(self.deadline, self.source.fetch(vhost)).await {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                record_policy_refresh("fetch_error");
                tracing::warn!(vhost, error = %e, "remote policy fetch failed, failing open");
                return RemotePolicy::permissive(now);
            }
            Err(_) => {
                record_policy_refresh("fetch_error");
                tracing::warn!(vhost, "remote policy fetch timed out, failing open");
                return RemotePolicy::permissive(now);
            }
        };

        let compiled = RuleTable::compile(compiler, &document.rules, vhost).and_then(|rules| {
            HeaderForge::compile(compiler, &document.headers).map(|forge| (rules, forge))
        });
        match compiled {
            Ok((rules, forge)) => {
                record_policy_refresh("ok");
                tracing::info!(vhost, rules = rules.rules().len(), "remote policy refreshed");
                RemotePolicy {
                    rules: Arc::new(rules),
                    forge: Arc::new(forge),
                    fetched_at: now,
                    fail_open: false,
                }
            }
            Err(e) => {
                record_policy_refresh("compile_error");
                tracing::warn!(vhost, error = %e, "remote policy rejected, failing open");
                RemotePolicy::permissive(now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_rules::{FunctionLibrary, Predicate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        document: Option<PolicyDocument>,
        delay: Duration,
    }

    impl CountingSource {
        fn new(document: Option<PolicyDocument>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                document,
                delay: Duration::from_millis(0),
            }
        }
    }

    impl PolicySource for CountingSource {
        fn fetch<'a>(&'a self, vhost: &'a str) -> BoxFuture<'a, HandlerResult<PolicyDocument>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.document
                    .clone()
                    .ok_or_else(|| HandlerError::remote_policy(vhost, "unreachable"))
            })
        }
    }

    fn compiler() -> ConditionCompiler {
        ConditionCompiler::new(FunctionLibrary::new(), "http://auth.example.com/")
    }

    fn document() -> PolicyDocument {
        let mut rules = IndexMap::new();
        rules.insert("^/admin".to_string(), "$uid eq 'root'".to_string());
        rules.insert("default".to_string(), "deny".to_string());
        PolicyDocument {
            rules,
            headers: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn test_cache_until_stale() {
        let source = Arc::new(CountingSource::new(Some(document())));
        let refresher = RemotePolicyRefresher::new(source.clone(), Duration::from_secs(1));

        let policy = refresher.policy("app.example.com", &compiler(), 1000).await;
        assert!(!policy.fail_open);
        assert!(matches!(policy.rules.default_condition().predicate, Predicate::Deny));

        refresher.policy("app.example.com", &compiler(), 1000 + POLICY_TTL - 1).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        refresher.policy("app.example.com", &compiler(), 1000 + POLICY_TTL).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_open() {
        let source = Arc::new(CountingSource::new(None));
        let refresher = RemotePolicyRefresher::new(source, Duration::from_secs(1));
        let policy = refresher.policy("app.example.com", &compiler(), 1000).await;
        assert!(policy.fail_open);
        assert!(matches!(policy.rules.default_condition().predicate, Predicate::Accept));
        assert!(policy.forge.is_empty());
    }

    #[tokio::test]
    async fn test_bad_rule_fails_open() {
        let mut doc = document();
        doc.rules.insert("^/x".to_string(), "$uid eq".to_string());
        let source = Arc::new(CountingSource::new(Some(doc)));
        let refresher = RemotePolicyRefresher::new(source, Duration::from_secs(1));
        let policy = refresher.policy("app.example.com", &compiler(), 1000).await;
        assert!(policy.fail_open);
    }

    #[tokio::test]
    async fn test_timeout_fails_open() {
        let mut source = CountingSource::new(Some(document()));
        source.delay = Duration::from_millis(200);
        let refresher = RemotePolicyRefresher::new(Arc::new(source), Duration::from_millis(20));
        let policy = refresher.policy("app.example.com", &compiler(), 1000).await;
        assert!(policy.fail_open);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_coalesced() {
        let mut source = CountingSource::new(Some(document()));
        source.delay = Duration::from_millis(50);
        let source = Arc::new(source);
        let refresher = Arc::new(RemotePolicyRefresher::new(source.clone(), Duration::from_secs(1)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let refresher = Arc::clone(&refresher);
                tokio::spawn(async move {
                    refresher.policy("app.example.com", &compiler(), 1000).await
                })
            })
            .collect();
        for task in tasks {
            assert!(!task.await.unwrap().fail_open);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        refresher.policy("other.example.com", &compiler(), 1000).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
