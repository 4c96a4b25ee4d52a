//! SSO cookie extraction.

use gatehouse_config::ConfigError;
use http::header::COOKIE;
use regex::Regex;

use super::{ExtractContext, ExtractedIdentity, IdentityExtractor};
use crate::error::HandlerResult;
use crate::request::AccessRequest;
use crate::BoxFuture;

/// Reads the session id from `<cookieName>=<id>`.
#[derive(Debug, Clone)]
pub struct CookieExtractor {
    name: String,
    pattern: Regex,
}

impl CookieExtractor {
    /// Extractor for the cookie `name`.
    pub fn new(name: &str) -> HandlerResult<Self> {
        let pattern = Regex::new(&format!(r"\b{}=([^;]+)", regex::escape(name)))
            .map_err(|e| ConfigError::invalid_value("handler.cookieName", e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
        })
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session id from the `Cookie` headers.
    pub fn session_id(&self, request: &AccessRequest) -> Option<String> {
        request
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|cookies| {
                self.pattern
                    .captures(cookies)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
            })
            .filter(|id| !id.is_empty())
    }

    /// [`Self::session_id`] as an extracted identity.
    pub fn identity(&self, request: &AccessRequest) -> Option<ExtractedIdentity> {
        self.session_id(request)
            .map(|id| ExtractedIdentity::from_cookie(id, &self.name))
    }
}

impl IdentityExtractor for CookieExtractor {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn extract<'a>(
        &'a self,
        request: &'a AccessRequest,
        _ctx: ExtractContext<'a>,
    ) -> BoxFuture<'a, Option<ExtractedIdentity>> {
        let identity = self.identity(request);
        Box::pin(async move { identity })
    }
}
