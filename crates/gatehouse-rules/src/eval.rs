//! Compiled expression tree and its evaluator.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::EvalError;
use crate::functions::Function;
use crate::lexer::CompareOp;
use crate::value::Value;

/// Read access to session attributes.
pub trait Attributes {
    /// Look up an attribute by name.
    fn attribute(&self, name: &str) -> Option<Value>;
}

impl Attributes for serde_json::Map<String, serde_json::Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).map(Value::from_json)
    }
}

impl Attributes for HashMap<String, String> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| Value::Str(v.clone()))
    }
}

/// Request facts exposed to expressions through `$vhost`, `$ip` and `$date`.
#[derive(Debug, Clone)]
pub struct RequestScope {
    /// Canonical virtual host.
    pub vhost: String,
    /// Caller address, when known.
    pub remote_ip: Option<IpAddr>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

impl RequestScope {
    /// Scope evaluated at the current time.
    pub fn new(vhost: impl Into<String>, remote_ip: Option<IpAddr>) -> Self {
        Self {
            vhost: vhost.into(),
            remote_ip,
            now: Utc::now(),
        }
    }

    /// Pin the evaluation time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// `YYYYMMDDHHMMSS` in UTC.
    pub fn date(&self) -> String {
        self.now.format("%Y%m%d%H%M%S").to_string()
    }
}

/// Everything an expression can read.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    /// Request facts.
    pub scope: &'a RequestScope,
    /// Session attributes.
    pub attributes: &'a dyn Attributes,
}

impl<'a> EvalContext<'a> {
    /// Pair a request scope with session attributes.
    pub fn new(scope: &'a RequestScope, attributes: &'a dyn Attributes) -> Self {
        Self { scope, attributes }
    }
}

/// Variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Var {
    /// `$date`
    Date,
    /// `$vhost`
    Vhost,
    /// `$ip`
    Ip,
    /// Any other `$name`: a session attribute.
    Attr(String),
}

impl Var {
    /// Map a variable name to its reference.
    pub fn from_name(name: &str) -> Self {
        match name {
            "date" => Self::Date,
            "vhost" => Self::Vhost,
            "ip" => Self::Ip,
            other => Self::Attr(other.to_string()),
        }
    }

    fn read(&self, ctx: &EvalContext<'_>) -> Value {
        match self {
            Self::Date => Value::Str(ctx.scope.date()),
            Self::Vhost => Value::Str(ctx.scope.vhost.clone()),
            Self::Ip => ctx
                .scope
                .remote_ip
                .map_or(Value::Undef, |ip| Value::Str(ip.to_string())),
            Self::Attr(name) => ctx.attributes.attribute(name).unwrap_or(Value::Undef),
        }
    }
}

/// Piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// Interpolated variable.
    Var(Var),
}

/// Compiled expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// Double-quoted string with interpolation.
    Template(Vec<Segment>),
    /// Variable read.
    Var(Var),
    /// `!e` / `not e`
    Not(Box<Expr>),
    /// `-e`
    Neg(Box<Expr>),
    /// `a && b` / `a and b`, yielding the deciding operand.
    And(Box<Expr>, Box<Expr>),
    /// `a || b` / `a or b`, yielding the deciding operand.
    Or(Box<Expr>, Box<Expr>),
    /// `a . b`
    Concat(Box<Expr>, Box<Expr>),
    /// Comparison.
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    /// `e =~ /re/` or `e !~ /re/`
    Match {
        /// Matched operand.
        subject: Box<Expr>,
        /// Compiled literal.
        regex: Regex,
        /// `!~`
        negate: bool,
    },
    /// `c ? a : b`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Function call resolved against the library.
    Call {
        /// Name as written.
        name: String,
        /// Resolved function.
        function: Function,
        /// Arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Evaluate against a request and a session.
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Var(var) => out.push_str(&var.read(ctx).to_text()),
                    }
                }
                Value::Str(out)
            }
            Self::Var(var) => var.read(ctx),
            Self::Not(e) => Value::Bool(!e.eval(ctx)?.is_truthy()),
            Self::Neg(e) => Value::Num(-e.eval(ctx)?.to_number()),
            Self::And(a, b) => {
                let left = a.eval(ctx)?;
                if left.is_truthy() {
                    b.eval(ctx)?
                } else {
                    left
                }
            }
            Self::Or(a, b) => {
                let left = a.eval(ctx)?;
                if left.is_truthy() {
                    left
                } else {
                    b.eval(ctx)?
                }
            }
            Self::Concat(a, b) => {
                let mut text = a.eval(ctx)?.to_text();
                text.push_str(&b.eval(ctx)?.to_text());
                Value::Str(text)
            }
            Self::Compare(op, a, b) => Value::Bool(compare(*op, &a.eval(ctx)?, &b.eval(ctx)?)),
            Self::Match {
                subject,
                regex,
                negate,
            } => {
                let text = subject.eval(ctx)?.to_text();
                Value::Bool(regex.is_match(&text) != *negate)
            }
            Self::Ternary(c, a, b) => {
                if c.eval(ctx)?.is_truthy() {
                    a.eval(ctx)?
                } else {
                    b.eval(ctx)?
                }
            }
            Self::Call {
                name,
                function,
                args,
            } => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                function.call(name, &values, ctx.scope)?
            }
        })
    }

    /// Evaluate and reduce to a boolean.
    pub fn test(&self, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
        self.eval(ctx).map(|v| v.is_truthy())
    }
}

fn compare(op: CompareOp, a: &Value, b: &Value) -> bool {
    match op {
        CompareOp::StrEq => a.to_text() == b.to_text(),
        CompareOp::StrNe => a.to_text() != b.to_text(),
        CompareOp::StrLt => a.to_text() < b.to_text(),
        CompareOp::StrGt => a.to_text() > b.to_text(),
        CompareOp::StrLe => a.to_text() <= b.to_text(),
        CompareOp::StrGe => a.to_text() >= b.to_text(),
        numeric => {
            let ordering = a.to_number().partial_cmp(&b.to_number());
            match numeric {
                CompareOp::NumEq => ordering == Some(Ordering::Equal),
                CompareOp::NumNe => ordering != Some(Ordering::Equal),
                CompareOp::NumLt => ordering == Some(Ordering::Less),
                CompareOp::NumGt => ordering == Some(Ordering::Greater),
                CompareOp::NumLe => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }
        }
    }
}
