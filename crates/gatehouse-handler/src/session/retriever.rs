//! Session retrieval policy: lifetime, inactivity and activity touch.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_config::HandlerConf;
use gatehouse_telemetry::metrics::record_session_lookup;

use super::{Session, SessionStore};
use crate::error::{HandlerError, HandlerResult};

/// Minimum delay between two `_lastSeen` write-backs, in seconds.
pub const TOUCH_INTERVAL: i64 = 60;

/// Fetches sessions and enforces the configured timeouts.
#[derive(Clone)]
pub struct SessionRetriever {
    store: Arc<dyn SessionStore>,
    timeout: i64,
    timeout_activity: Option<i64>,
    deadline: Duration,
}

impl std::fmt::Debug for SessionRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRetriever")
            .field("store", &self.store.name())
            .field("timeout", &self.timeout)
            .field("timeout_activity", &self.timeout_activity)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl SessionRetriever {
    /// Retriever over `store`.
    ///
    /// `timeout` is the session lifetime, `timeout_activity` the optional
    /// inactivity limit, both in seconds. `deadline` bounds each store call.
    pub fn new(
        store: Arc<dyn SessionStore>,
        timeout: u64,
        timeout_activity: Option<u64>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            timeout: timeout as i64,
            timeout_activity: timeout_activity.filter(|t| *t > 0).map(|t| t as i64),
            deadline,
        }
    }

    /// Retriever using the timeouts of `conf`.
    pub fn from_conf(store: Arc<dyn SessionStore>, conf: &HandlerConf) -> Self {
        Self::new(
            store,
            conf.timeout,
            Some(conf.timeout_activity),
            Duration::from_secs(conf.collaborator_timeout),
        )
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Fetch `id` and check it is still valid at `now`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` or `SessionExpired` when the session cannot be
    /// used, `Store` or `Timeout` when the store failed.
    pub async fn retrieve(&self, id: &str, now: i64) -> HandlerResult<Session> {
        let fetched = tokio::time::timeout(self.deadline, self.store.get(id))
            .await
            .map_err(|_| HandlerError::Timeout {
                operation: "session lookup",
            })
            .and_then(|result| result);

        let mut session = match fetched {
            Ok(Some(session)) => session,
            Ok(None) => {
                record_session_lookup("missing");
                return Err(HandlerError::SessionNotFound);
            }
            Err(e) => {
                record_session_lookup("error");
                tracing::warn!(store = self.store.name(), error = %e, "session lookup failed");
                return Err(e);
            }
        };

        if let Err(e) = self.check(&session, now) {
            record_session_lookup("expired");
            tracing::debug!(error = %e, "session rejected");
            return Err(e);
        }

        if let Some(activity) = self.timeout_activity {
            let idle = now.saturating_sub(session.last_seen().unwrap_or(0));
            if activity > 0 && idle > TOUCH_INTERVAL {
                session.touch(now);
                self.write_back(&session).await;
            }
        }

        record_session_lookup("found");
        Ok(session)
    }

    /// Lifetime and inactivity checks.
    pub fn check(&self, session: &Session, now: i64) -> HandlerResult<()> {
        let Some(created) = session.utime() else {
            return Err(HandlerError::SessionExpired {
                reason: "missing creation time",
            });
        };
        if now.saturating_sub(created) > self.timeout {
            return Err(HandlerError::SessionExpired { reason: "timeout" });
        }
        if let (Some(activity), Some(last_seen)) = (self.timeout_activity, session.last_seen()) {
            if now.saturating_sub(last_seen) > activity {
                return Err(HandlerError::SessionExpired {
                    reason: "inactivity",
                });
            }
        }
        Ok(())
    }

    async fn write_back(&self, session: &Session) {
        match tokio::time::timeout(self.deadline, self.store.update(session)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to touch session"),
            Err(_) => tracing::warn!("session touch timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn store_with(data: serde_json::Value) -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        let serde_json::Value::Object(map) = data else {
            unreachable!()
        };
        store.insert("sid", map);
        store
    }

    fn retriever(store: Arc<MemorySessionStore>, activity: Option<u64>) -> SessionRetriever {
        SessionRetriever::new(store, 7200, activity, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_valid_session() {
        let store = store_with(json!({"_utime": NOW - 100, "uid": "alice"}));
        let session = retriever(store, None).retrieve("sid", NOW).await.unwrap();
        assert_eq!(session.user("uid").as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = Arc::new(MemorySessionStore::new());
        let result = retriever(store, None).retrieve("sid", NOW).await;
        assert!(matches!(result, Err(HandlerError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_lifetime_boundary() {
        let store = store_with(json!({"_utime": NOW - 7200}));
        assert!(retriever(store.clone(), None).retrieve("sid", NOW).await.is_ok());
        let result = retriever(store, None).retrieve("sid", NOW + 1).await;
        assert!(matches!(result, Err(HandlerError::SessionExpired { reason: "timeout" })));
    }

    #[tokio::test]
    async fn test_inactivity() {
        let store = store_with(json!({"_utime": NOW - 100, "_lastSeen": NOW - 601}));
        let result = retriever(store, Some(600)).retrieve("sid", NOW).await;
        assert!(matches!(result, Err(HandlerError::SessionExpired { reason: "inactivity" })));
    }

    #[tokio::test]
    async fn test_touch_is_throttled() {
        let store = store_with(json!({"_utime": NOW - 100, "_lastSeen": NOW - 30}));
        let r = retriever(store.clone(), Some(600));

        r.retrieve("sid", NOW).await.unwrap();
        let stored = store.get("sid").await.unwrap().unwrap();
        assert_eq!(stored.last_seen(), Some(NOW - 30));

        r.retrieve("sid", NOW + 31).await.unwrap();
        let stored = store.get("sid").await.unwrap().unwrap();
        assert_eq!(stored.last_seen(), Some(NOW + 31));
    }

    #[tokio::test]
    async fn test_extreme_timestamps_expire() {
        let store = store_with(json!({"_utime": "-9223372036854775808"}));
        let result = retriever(store, None).retrieve("sid", NOW).await;
        assert!(matches!(result, Err(HandlerError::SessionExpired { reason: "timeout" })));

        let store = store_with(json!({"_utime": NOW - 100, "_lastSeen": i64::MIN}));
        let result = retriever(store, Some(600)).retrieve("sid", NOW).await;
        assert!(matches!(result, Err(HandlerError::SessionExpired { reason: "inactivity" })));
    }

    #[tokio::test]
    async fn test_no_touch_without_activity_timeout() {
        let store = store_with(json!({"_utime": NOW - 100}));
        retriever(store.clone(), Some(0)).retrieve("sid", NOW).await.unwrap();
        let stored = store.get("sid").await.unwrap().unwrap();
        assert_eq!(stored.last_seen(), None);
    }
}
