//! In-process session store.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Map;

use super::{Session, SessionStore};
use crate::error::HandlerResult;
use crate::BoxFuture;

/// Sessions kept in a map behind a lock.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Map<String, serde_json::Value>>>,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session under `id`.
    pub fn insert(&self, id: impl Into<String>, data: Map<String, serde_json::Value>) {
        self.sessions.write().insert(id.into(), data);
    }

    /// Remove a session.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, HandlerResult<Option<Session>>> {
        let found = self
            .sessions
            .read()
            .get(id)
            .map(|data| Session::new(id, data.clone()));
        Box::pin(async move { Ok(found) })
    }

    fn update<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, HandlerResult<()>> {
        self.sessions
            .write()
            .insert(session.id().to_string(), session.data().clone());
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_get_update() {
        let store = MemorySessionStore::new();
        assert!(store.get("abc").await.unwrap().is_none());

        let serde_json::Value::Object(data) = json!({"uid": "alice"}) else {
            unreachable!()
        };
        store.insert("abc", data);
        let mut session = store.get("abc").await.unwrap().unwrap();
        assert_eq!(session.user("uid").as_deref(), Some("alice"));

        session.touch(100);
        store.update(&session).await.unwrap();
        let reloaded = store.get("abc").await.unwrap().unwrap();
        assert_eq!(reloaded.last_seen(), Some(100));

        assert!(store.remove("abc"));
        assert!(store.is_empty());
    }
}
