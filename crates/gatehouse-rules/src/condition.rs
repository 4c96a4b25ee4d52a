//! Rule conditions: keywords, logout handling and compiled predicates.

use crate::error::{EvalError, RuleResult};
use crate::eval::{EvalContext, Expr};
use crate::functions::FunctionLibrary;
use crate::parser::parse;

/// How much of the pipeline a matching rule exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ProtectionLevel {
    /// Full pipeline.
    #[default]
    Normal = 0,
    /// Full pipeline; carried as metadata on the grant.
    Unprotect = 1,
    /// Grant immediately, no session lookup.
    Skip = 2,
}

impl ProtectionLevel {
    /// Numeric level as exposed in logs.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Which sessions a logout rule terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutKind {
    /// `logout` / `logout_sso`
    Sso,
    /// `logout_app`
    App,
    /// `logout_app_sso`
    AppSso,
}

/// Compiled predicate of a rule.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Always true.
    Accept,
    /// Always false.
    Deny,
    /// Always false, with a logout redirect.
    Logout {
        /// Logout flavour.
        kind: LogoutKind,
        /// Where to send the user.
        url: String,
    },
    /// Compiled expression.
    Expression(Expr),
}

/// Outcome of evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Access granted.
    Grant,
    /// Access denied.
    Deny,
    /// Access denied, redirect to the logout URL.
    Logout(String),
}

impl Predicate {
    /// Evaluate against a request and session.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Verdict, EvalError> {
        Ok(match self {
            Self::Accept => Verdict::Grant,
            Self::Deny => Verdict::Deny,
            Self::Logout { url, .. } => Verdict::Logout(url.clone()),
            Self::Expression(expr) => {
                if expr.test(ctx)? {
                    Verdict::Grant
                } else {
                    Verdict::Deny
                }
            }
        })
    }
}

/// A compiled rule condition.
#[derive(Debug, Clone)]
pub struct Condition {
    /// The predicate.
    pub predicate: Predicate,
    /// Protection level.
    pub protection: ProtectionLevel,
    /// Condition text as configured.
    pub source: String,
}

impl Condition {
    /// `accept` at `Normal` protection.
    pub fn accept() -> Self {
        Self {
            predicate: Predicate::Accept,
            protection: ProtectionLevel::Normal,
            source: "accept".to_string(),
        }
    }

    /// `deny` at `Normal` protection.
    pub fn deny() -> Self {
        Self {
            predicate: Predicate::Deny,
            protection: ProtectionLevel::Normal,
            source: "deny".to_string(),
        }
    }
}

/// Compiles condition and header expressions against one function library.
#[derive(Debug, Clone)]
pub struct ConditionCompiler {
    library: FunctionLibrary,
    portal: String,
}

impl ConditionCompiler {
    /// Create a compiler. `portal` is the default logout target.
    pub fn new(library: FunctionLibrary, portal: impl Into<String>) -> Self {
        Self {
            library,
            portal: portal.into(),
        }
    }

    /// Portal URL used by logout rules without an argument.
    pub fn portal(&self) -> &str {
        &self.portal
    }

    /// Compile a rule condition, recognising the keywords first.
    pub fn compile_rule(&self, text: &str) -> RuleResult<Condition> {
        let trimmed = text.trim();
        let keyword = |predicate, protection| Condition {
            predicate,
            protection,
            source: text.to_string(),
        };
        match trimmed.to_ascii_lowercase().as_str() {
            "accept" => return Ok(keyword(Predicate::Accept, ProtectionLevel::Normal)),
            "deny" => return Ok(keyword(Predicate::Deny, ProtectionLevel::Normal)),
            "unprotect" => return Ok(keyword(Predicate::Accept, ProtectionLevel::Unprotect)),
            "skip" => return Ok(keyword(Predicate::Accept, ProtectionLevel::Skip)),
            _ => {}
        }
        let (head, argument) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(head, rest)| (head, rest.trim()));
        let kind = match head.to_ascii_lowercase().as_str() {
            "logout" | "logout_sso" => Some(LogoutKind::Sso),
            "logout_app" => Some(LogoutKind::App),
            "logout_app_sso" => Some(LogoutKind::AppSso),
            _ => None,
        };
        if let Some(kind) = kind {
            let url = if argument.is_empty() {
                self.portal.clone()
            } else {
                argument.to_string()
            };
            return Ok(keyword(Predicate::Logout { kind, url }, ProtectionLevel::Normal));
        }
        Ok(keyword(
            Predicate::Expression(self.compile_expression(trimmed)?),
            ProtectionLevel::Normal,
        ))
    }

    /// Compile a bare expression (header values, custom predicates).
    pub fn compile_expression(&self, text: &str) -> RuleResult<Expr> {
        parse(text, &self.library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::RequestScope;
    use std::collections::HashMap;

    const PORTAL: &str = "https://auth.example.com/";

    fn compiler() -> ConditionCompiler {
        ConditionCompiler::new(FunctionLibrary::new(), PORTAL)
    }

    fn verdict(condition: &Condition, attrs: &[(&str, &str)]) -> Verdict {
        let attrs: HashMap<String, String> = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let scope = RequestScope::new("app.example.com", None);
        condition
            .predicate
            .evaluate(&EvalContext::new(&scope, &attrs))
            .unwrap()
    }

    #[test]
    fn test_keywords() {
        let c = compiler();
        let accept = c.compile_rule("accept").unwrap();
        assert_eq!(accept.protection, ProtectionLevel::Normal);
        assert_eq!(verdict(&accept, &[]), Verdict::Grant);

        let deny = c.compile_rule(" Deny ").unwrap();
        assert_eq!(verdict(&deny, &[]), Verdict::Deny);

        let unprotect = c.compile_rule("unprotect").unwrap();
        assert_eq!(unprotect.protection, ProtectionLevel::Unprotect);
        assert_eq!(verdict(&unprotect, &[]), Verdict::Grant);

        let skip = c.compile_rule("SKIP").unwrap();
        assert_eq!(skip.protection, ProtectionLevel::Skip);
    }

    #[test]
    fn test_logout_defaults_to_portal() {
        let logout = compiler().compile_rule("logout_sso").unwrap();
        assert!(matches!(
            logout.predicate,
            Predicate::Logout { kind: LogoutKind::Sso, .. }
        ));
        assert_eq!(verdict(&logout, &[]), Verdict::Logout(PORTAL.to_string()));
    }

    #[test]
    fn test_logout_app_with_url() {
        let logout = compiler()
            .compile_rule("logout_app https://app.example.com/bye")
            .unwrap();
        assert!(matches!(
            logout.predicate,
            Predicate::Logout { kind: LogoutKind::App, .. }
        ));
        assert_eq!(
            verdict(&logout, &[("uid", "alice")]),
            Verdict::Logout("https://app.example.com/bye".to_string())
        );
    }

    #[test]
    fn test_logout_app_sso() {
        let logout = compiler().compile_rule("Logout_App_SSO").unwrap();
        assert!(matches!(
            logout.predicate,
            Predicate::Logout { kind: LogoutKind::AppSso, .. }
        ));
    }

    #[test]
    fn test_expression_condition() {
        let cond = compiler().compile_rule("$uid eq 'admin'").unwrap();
        assert_eq!(cond.source, "$uid eq 'admin'");
        assert_eq!(verdict(&cond, &[("uid", "admin")]), Verdict::Grant);
        assert_eq!(verdict(&cond, &[("uid", "bob")]), Verdict::Deny);
    }

    #[test]
    fn test_keyword_prefix_is_not_keyword() {
        assert!(compiler().compile_rule("accepted").is_err());
    }

    #[test]
    fn test_protection_ordering() {
        assert!(ProtectionLevel::Skip > ProtectionLevel::Unprotect);
        assert_eq!(ProtectionLevel::Unprotect.as_u8(), 1);
    }
}
