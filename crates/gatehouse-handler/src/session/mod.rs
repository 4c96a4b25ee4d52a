//! Sessions and session storage.
//!
//! The handler never owns session persistence. It reads sessions through a
//! [`SessionStore`] and writes back only the `_lastSeen` touch. Two stores
//! ship with the crate:
//!
//! - [`MemorySessionStore`]: in-process map, for tests and single-node setups
//! - [`RestSessionStore`]: the portal's REST session API

mod memory;
mod rest;
mod retriever;

pub use memory::MemorySessionStore;
pub use rest::RestSessionStore;
pub use retriever::{SessionRetriever, TOUCH_INTERVAL};

use gatehouse_rules::{Attributes, Value};
use serde_json::Map;

use crate::error::HandlerResult;
use crate::BoxFuture;

/// Creation time attribute.
pub const UTIME: &str = "_utime";
/// Last activity attribute.
pub const LAST_SEEN: &str = "_lastSeen";
/// Logout target stored with the session.
pub const LOGOUT: &str = "_logout";

/// A session: an id and an attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    data: Map<String, serde_json::Value>,
    logout_url: Option<String>,
}

impl Session {
    /// Session `id` with `data`.
    pub fn new(id: impl Into<String>, data: Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            data,
            logout_url: None,
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw attribute.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }

    /// Set an attribute.
    pub fn set(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.data.insert(name.into(), value);
    }

    /// All attributes.
    pub fn data(&self) -> &Map<String, serde_json::Value> {
        &self.data
    }

    /// Creation time, seconds since the epoch.
    pub fn utime(&self) -> Option<i64> {
        self.get(UTIME).and_then(as_seconds)
    }

    /// Last activity, seconds since the epoch.
    pub fn last_seen(&self) -> Option<i64> {
        self.get(LAST_SEEN).and_then(as_seconds)
    }

    /// Record activity at `now`.
    pub fn touch(&mut self, now: i64) {
        self.data.insert(LAST_SEEN.to_string(), now.into());
    }

    /// Value of the traced attribute, as text.
    pub fn user(&self, attribute: &str) -> Option<String> {
        match self.get(attribute)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(Value::from_json(other).to_text()),
        }
    }

    /// Logout target: the one set by a logout rule during this request,
    /// otherwise a non-empty `_logout` attribute.
    pub fn logout_url(&self) -> Option<&str> {
        self.logout_url.as_deref().or_else(|| {
            self.get(LOGOUT)
                .and_then(serde_json::Value::as_str)
                .filter(|url| !url.is_empty())
        })
    }

    /// Set the logout target for this request only.
    pub fn set_logout_url(&mut self, url: impl Into<String>) {
        self.logout_url = Some(url.into());
    }
}

impl Attributes for Session {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.data.attribute(name)
    }
}

fn as_seconds(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Session storage collaborator.
pub trait SessionStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch a session. `Ok(None)` when it does not exist.
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, HandlerResult<Option<Session>>>;

    /// Persist the session attributes.
    fn update<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, HandlerResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(data: serde_json::Value) -> Session {
        let serde_json::Value::Object(map) = data else {
            panic!("object expected")
        };
        Session::new("abc", map)
    }

    #[test]
    fn test_timestamps_number_or_string() {
        let s = session(json!({"_utime": "1700000000", "_lastSeen": 1_700_000_100}));
        assert_eq!(s.utime(), Some(1_700_000_000));
        assert_eq!(s.last_seen(), Some(1_700_000_100));

        let s = session(json!({"_utime": "yesterday"}));
        assert_eq!(s.utime(), None);
        assert_eq!(s.last_seen(), None);
    }

    #[test]
    fn test_user_attribute() {
        let s = session(json!({"uid": "alice", "uidNumber": 1001, "nothing": null}));
        assert_eq!(s.user("uid").as_deref(), Some("alice"));
        assert_eq!(s.user("uidNumber").as_deref(), Some("1001"));
        assert_eq!(s.user("nothing"), None);
        assert_eq!(s.user("mail"), None);
    }

    #[test]
    fn test_touch_and_logout() {
        let mut s = session(json!({}));
        s.touch(42);
        assert_eq!(s.last_seen(), Some(42));
        assert!(s.logout_url().is_none());
        s.set_logout_url("http://auth.example.com/");
        assert_eq!(s.logout_url(), Some("http://auth.example.com/"));
        assert!(s.get("_logout").is_none());
    }

    #[test]
    fn test_stored_logout() {
        let mut s = session(json!({"_logout": "http://auth.example.com/bye"}));
        assert_eq!(s.logout_url(), Some("http://auth.example.com/bye"));
        s.set_logout_url("http://app.example.com/");
        assert_eq!(s.logout_url(), Some("http://app.example.com/"));

        assert!(session(json!({"_logout": ""})).logout_url().is_none());
    }

    #[test]
    fn test_attributes_for_expressions() {
        let s = session(json!({"uid": "root"}));
        assert_eq!(s.attribute("uid"), Some(Value::Str("root".to_string())));
        assert_eq!(s.attribute("missing"), None);
    }
}
