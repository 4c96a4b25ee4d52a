//! Error types for the rules crate.

use thiserror::Error;

/// Result type for rule compilation.
pub type RuleResult<T> = Result<T, RuleError>;

/// Errors raised while compiling rules, conditions and header expressions.
///
/// These are configuration-load errors: they abort the reload of the
/// affected virtual host and never surface on a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuleError {
    /// The expression could not be parsed.
    #[error("syntax error in `{expression}` at offset {position}: {message}")]
    Syntax {
        /// The offending expression.
        expression: String,
        /// Byte offset of the error.
        position: usize,
        /// What went wrong.
        message: String,
    },

    /// The expression calls a function outside the allow-list.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// A helper was called with the wrong number of arguments.
    #[error("{function}() expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        function: String,
        /// Human-readable expected count.
        expected: &'static str,
        /// Actual count.
        got: usize,
    },

    /// A location pattern is not a valid regular expression.
    #[error("invalid location pattern `{pattern}`: {source}")]
    Pattern {
        /// The pattern as written in the configuration.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A `=~` literal is not a valid regular expression.
    #[error("invalid regular expression /{pattern}/: {message}")]
    Regex {
        /// The regex literal.
        pattern: String,
        /// Underlying error message.
        message: String,
    },

    /// An exported header name is not a valid HTTP header name.
    #[error("invalid header name `{0}`")]
    HeaderName(String),

    /// `encrypt()` is used but no cipher key is configured.
    #[error("encrypt() requires a configured cipher key")]
    MissingCipher,
}

impl RuleError {
    /// Create a syntax error.
    pub fn syntax(expression: &str, position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            expression: expression.to_string(),
            position,
            message: message.into(),
        }
    }
}

/// Errors raised while evaluating a compiled expression.
///
/// A failing predicate is a server error for that request, never a deny.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvalError {
    /// A helper or custom function failed.
    #[error("{function}() failed: {message}")]
    Function {
        /// Function name.
        function: String,
        /// Failure message.
        message: String,
    },
}

impl EvalError {
    /// Create a function failure.
    pub fn function(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            function: function.into(),
            message: message.into(),
        }
    }
}
