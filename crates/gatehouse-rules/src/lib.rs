//! Gatehouse Rules - Access Rule Compilation
//!
//! This crate compiles the access-control configuration of a virtual host
//! into data that can be evaluated per request without re-parsing anything.
//!
//! # Overview
//!
//! - **Conditions**: `accept`, `deny`, `unprotect`, `skip`, `logout*` and
//!   boolean expressions over session attributes
//! - **Rule tables**: ordered URI patterns with a mandatory default
//! - **Header forge**: exported header expressions evaluated on grant
//!
//! Expressions are compiled into a small AST over an allow-listed symbol
//! table. A call to a function that the [`FunctionLibrary`] does not know is
//! rejected when the configuration is loaded, never at request time.
//!
//! # Architecture
//!
//! ```text
//!   locationRules[vhost]        exportedHeaders[vhost]
//!          │                             │
//!   ┌──────▼──────────┐          ┌───────▼─────────┐
//!   │   RuleTable     │          │   HeaderForge   │
//!   └──────┬──────────┘          └───────┬─────────┘
//!          │ compile_rule                │ compile_expression
//!   ┌──────▼─────────────────────────────▼─────────┐
//!   │            ConditionCompiler                 │
//!   │   lexer → parser → Expr  (FunctionLibrary)   │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_rules::{ConditionCompiler, FunctionLibrary, RuleTable, EvalContext, RequestScope};
//!
//! let compiler = ConditionCompiler::new(FunctionLibrary::new(), "https://auth.example.com/");
//! let table = RuleTable::compile(&compiler, &location_rules, "app.example.com")?;
//!
//! let condition = table.classify("/admin/users");
//! let scope = RequestScope::new("app.example.com", Some(remote_ip));
//! let verdict = condition.predicate.evaluate(&EvalContext::new(&scope, &session.data))?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod condition;
pub mod error;
pub mod eval;
pub mod forge;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod table;
pub mod value;

// Re-exports for convenience
pub use condition::{
    Condition, ConditionCompiler, LogoutKind, Predicate, ProtectionLevel, Verdict,
};
pub use error::{EvalError, RuleError, RuleResult};
pub use eval::{Attributes, EvalContext, Expr, RequestScope};
pub use forge::HeaderForge;
pub use functions::{CustomFn, Encryptor, FunctionLibrary};
pub use table::{Rule, RuleTable};
pub use value::Value;
