//! Dynamic values produced by rule expressions.
//!
//! Session attributes are untyped strings in most deployments, so values
//! coerce freely between text and numbers the way the rule language expects:
//! string operators compare text, numeric operators compare numbers.

use std::fmt;

/// A value flowing through an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing attribute or absent result.
    Undef,
    /// Text value.
    Str(String),
    /// Numeric value.
    Num(f64),
    /// Boolean produced by comparisons and logical operators.
    Bool(bool),
}

impl Value {
    /// Truthiness: `Undef`, `""`, `"0"`, `0` and `false` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undef => false,
            Self::Str(s) => !(s.is_empty() || s == "0"),
            Self::Num(n) => *n != 0.0,
            Self::Bool(b) => *b,
        }
    }

    /// Whether the value is undefined.
    pub const fn is_undef(&self) -> bool {
        matches!(self, Self::Undef)
    }

    /// Text form of the value. `Undef` is the empty string.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Numeric form of the value.
    ///
    /// Text is read up to its longest numeric prefix; text without one is `0`.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undef => 0.0,
            Self::Num(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Str(s) => numeric_prefix(s),
        }
    }

    /// Convert a JSON session attribute into a value.
    ///
    /// Arrays are joined with `"; "`, the separator used for multi-valued
    /// attributes.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Undef,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Undef, Self::Num),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => Self::Str(
                items
                    .iter()
                    .map(|item| Self::from_json(item).to_text())
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            serde_json::Value::Object(_) => Self::Str(value.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undef => Ok(()),
            Self::Str(s) => f.write_str(s),
            Self::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Num(n) => write!(f, "{n}"),
            Self::Bool(true) => f.write_str("1"),
            Self::Bool(false) => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

fn numeric_prefix(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(n) = s.parse::<f64>() {
        return n;
    }
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => {}
            '0'..='9' => end = i + 1,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
    }
    s[..end].parse().unwrap_or(0.0)
}
