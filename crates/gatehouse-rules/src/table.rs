//! Per-vhost rule tables.
//!
//! A table is built from the ordered `locationRules` map of one virtual host.
//! The `default` key holds the fallback condition; every other key is a URI
//! regular expression. Lookup walks the rules in declared order and returns
//! the first match.

use indexmap::IndexMap;
use regex::Regex;

use crate::condition::{Condition, ConditionCompiler};
use crate::error::{RuleError, RuleResult};

/// Key of the fallback rule.
pub const DEFAULT_KEY: &str = "default";

/// A location rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Compiled URI pattern.
    pub pattern: Regex,
    /// Pattern as configured, comments included.
    pub source_pattern: String,
    /// Condition applied on match.
    pub condition: Condition,
}

/// Ordered rules plus the mandatory default.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
    default: Condition,
}

impl RuleTable {
    /// Compile the `locationRules` of `vhost`.
    ///
    /// A missing `default` entry is replaced by `accept` and logged.
    pub fn compile(
        compiler: &ConditionCompiler,
        location_rules: &IndexMap<String, String>,
        vhost: &str,
    ) -> RuleResult<Self> {
        let mut rules = Vec::with_capacity(location_rules.len());
        let mut default = None;
        for (key, condition) in location_rules {
            if key == DEFAULT_KEY {
                default = Some(compiler.compile_rule(condition)?);
                continue;
            }
            let stripped = strip_comment_groups(key);
            let pattern = Regex::new(&stripped).map_err(|source| RuleError::Pattern {
                pattern: key.clone(),
                source,
            })?;
            rules.push(Rule {
                pattern,
                source_pattern: key.clone(),
                condition: compiler.compile_rule(condition)?,
            });
        }
        let default = default.unwrap_or_else(|| {
            tracing::warn!(vhost = %vhost, "no default rule, using accept");
            Condition::accept()
        });
        tracing::debug!(vhost = %vhost, rules = rules.len(), "compiled rule table");
        Ok(Self { rules, default })
    }

    /// Table that grants everything at `Normal` protection.
    pub fn permissive() -> Self {
        Self {
            rules: Vec::new(),
            default: Condition::accept(),
        }
    }

    /// Table that denies everything.
    pub fn deny_all() -> Self {
        Self {
            rules: Vec::new(),
            default: Condition::deny(),
        }
    }

    /// First rule whose pattern matches `uri`, or the default.
    pub fn classify(&self, uri: &str) -> &Condition {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(uri))
            .map_or(&self.default, |rule| &rule.condition)
    }

    /// Rules in declared order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The default condition.
    pub fn default_condition(&self) -> &Condition {
        &self.default
    }
}

/// Remove inline `(?#...)` comment groups from a pattern.
pub fn strip_comment_groups(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("(?#") {
        out.push_str(&rest[..start]);
        match rest[start..].find(')') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Predicate, ProtectionLevel};
    use crate::functions::FunctionLibrary;

    fn compiler() -> ConditionCompiler {
        ConditionCompiler::new(FunctionLibrary::new(), "https://auth.example.com/")
    }

    fn rules(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_strip_comment_groups() {
        assert_eq!(strip_comment_groups("^/admin(?#Admins)"), "^/admin");
        assert_eq!(strip_comment_groups("(?#1)^/a(?#two)/b"), "^/a/b");
        assert_eq!(strip_comment_groups("^/plain"), "^/plain");
    }

    #[test]
    fn test_declared_order_wins() {
        let table = RuleTable::compile(
            &compiler(),
            &rules(&[
                ("^/admin/public", "accept"),
                ("^/admin", "deny"),
                ("default", "unprotect"),
            ]),
            "app.example.com",
        )
        .unwrap();
        assert!(matches!(
            table.classify("/admin/public/x").predicate,
            Predicate::Accept
        ));
        assert!(matches!(table.classify("/admin/x").predicate, Predicate::Deny));
        assert_eq!(
            table.classify("/other").protection,
            ProtectionLevel::Unprotect
        );
    }

    #[test]
    fn test_missing_default_is_accept() {
        let table = RuleTable::compile(&compiler(), &rules(&[("^/x", "deny")]), "h").unwrap();
        assert!(matches!(
            table.default_condition().predicate,
            Predicate::Accept
        ));
        assert_eq!(table.default_condition().protection, ProtectionLevel::Normal);
    }

    #[test]
    fn test_commented_pattern_keeps_source() {
        let table = RuleTable::compile(
            &compiler(),
            &rules(&[("^/static(?#assets)", "skip"), ("default", "deny")]),
            "h",
        )
        .unwrap();
        assert_eq!(table.rules()[0].source_pattern, "^/static(?#assets)");
        assert_eq!(table.classify("/static/app.js").protection, ProtectionLevel::Skip);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            RuleTable::compile(&compiler(), &rules(&[("^/(broken", "accept")]), "h"),
            Err(RuleError::Pattern { .. })
        ));
    }

    #[test]
    fn test_deny_all() {
        assert!(matches!(
            RuleTable::deny_all().classify("/").predicate,
            Predicate::Deny
        ));
    }
}
