//! Allow-listed helper functions callable from expressions.
//!
//! Expressions can only call what the [`FunctionLibrary`] resolves: the four
//! built-in helpers plus the custom functions the embedding application
//! registered and the configuration named.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnet::IpNet;

use crate::error::{EvalError, RuleError, RuleResult};
use crate::eval::RequestScope;
use crate::value::Value;

/// A custom function supplied by the embedding application.
pub type CustomFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Symmetric encryption used by `encrypt()`.
pub trait Encryptor: Send + Sync {
    /// Encrypt `plain` into a printable token.
    fn encrypt(&self, plain: &str) -> Result<String, String>;
}

/// A function resolved at compile time.
#[derive(Clone)]
pub enum Function {
    /// `basic(user, password)`
    Basic,
    /// `checkDate(start, end[, default])`
    CheckDate,
    /// `isInNet6(ip, networks)`
    IsInNet6,
    /// `encrypt(value)`
    Encrypt(Arc<dyn Encryptor>),
    /// Application-supplied function.
    Custom(CustomFn),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("Basic"),
            Self::CheckDate => f.write_str("CheckDate"),
            Self::IsInNet6 => f.write_str("IsInNet6"),
            Self::Encrypt(_) => f.write_str("Encrypt"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Function {
    /// Invoke the function.
    pub fn call(&self, name: &str, args: &[Value], scope: &RequestScope) -> Result<Value, EvalError> {
        match self {
            Self::Basic => Ok(Value::Str(basic(&args[0].to_text(), &args[1].to_text()))),
            Self::CheckDate => Ok(Value::Bool(check_date(
                &args[0],
                &args[1],
                args.get(2),
                &scope.date(),
            ))),
            Self::IsInNet6 => is_in_net6(&args[0].to_text(), &args[1].to_text())
                .map(Value::Bool)
                .map_err(|message| EvalError::function(name, message)),
            Self::Encrypt(cipher) => cipher
                .encrypt(&args[0].to_text())
                .map(Value::Str)
                .map_err(|message| EvalError::function(name, message)),
            Self::Custom(f) => f(args).map_err(|message| EvalError::function(name, message)),
        }
    }
}

/// The set of functions an expression may call.
#[derive(Clone, Default)]
pub struct FunctionLibrary {
    custom: HashMap<String, CustomFn>,
    encryptor: Option<Arc<dyn Encryptor>>,
}

impl fmt::Debug for FunctionLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("FunctionLibrary")
            .field("custom", &names)
            .field("encryptor", &self.encryptor.is_some())
            .finish()
    }
}

impl FunctionLibrary {
    /// Library with the built-in helpers only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cipher used by `encrypt()`.
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: Arc<dyn Encryptor>) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Register a custom function.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(f));
    }

    /// Keep only the custom functions whose names appear in `allowed`.
    ///
    /// Returns the library and the allowed names that have no registration.
    #[must_use]
    pub fn restrict_to(&self, allowed: &[String]) -> (Self, Vec<String>) {
        let custom = self
            .custom
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a == *name))
            .map(|(name, f)| (name.clone(), Arc::clone(f)))
            .collect::<HashMap<_, _>>();
        let missing = allowed
            .iter()
            .filter(|name| !custom.contains_key(*name))
            .cloned()
            .collect();
        (
            Self {
                custom,
                encryptor: self.encryptor.clone(),
            },
            missing,
        )
    }

    /// Names of the registered custom functions.
    pub fn custom_names(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    /// Resolve a call site, checking the argument count.
    pub fn resolve(&self, name: &str, argc: usize) -> RuleResult<Function> {
        let (function, expected, ok) = match name {
            "basic" => (Function::Basic, "2", argc == 2),
            "checkDate" => (Function::CheckDate, "2 or 3", (2..=3).contains(&argc)),
            "isInNet6" => (Function::IsInNet6, "2", argc == 2),
            "encrypt" => {
                let cipher = self.encryptor.clone().ok_or(RuleError::MissingCipher)?;
                (Function::Encrypt(cipher), "1", argc == 1)
            }
            other => {
                let f = self
                    .custom
                    .get(other)
                    .ok_or_else(|| RuleError::UnknownFunction(other.to_string()))?;
                return Ok(Function::Custom(Arc::clone(f)));
            }
        };
        if !ok {
            return Err(RuleError::Arity {
                function: name.to_string(),
                expected,
                got: argc,
            });
        }
        Ok(function)
    }
}

/// `"Basic " + base64(user:password)`.
pub fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Inclusive check of `date` (14 digits) against `[start, end]`.
///
/// Bounds are truncated to 14 digits; a short start is padded with `0`, a
/// short end with `9`. When both bounds are empty the optional default
/// decides, otherwise access is granted.
pub fn check_date(start: &Value, end: &Value, default: Option<&Value>, date: &str) -> bool {
    let start = digits(start);
    let end = digits(end);
    if start.is_empty() && end.is_empty() {
        return default.map_or(true, Value::is_truthy);
    }
    let start = pad(&start, '0');
    let end = pad(&end, '9');
    start.as_str() <= date && date <= end.as_str()
}

fn digits(value: &Value) -> String {
    value
        .to_text()
        .chars()
        .filter(char::is_ascii_digit)
        .take(14)
        .collect()
}

fn pad(digits: &str, fill: char) -> String {
    let mut out = digits.to_string();
    while out.len() < 14 {
        out.push(fill);
    }
    out
}

/// Whether `ip` belongs to any of the whitespace or comma separated networks.
///
/// A bare address is a host route. An unparseable `ip` is simply not a
/// member; an unparseable network is an error.
pub fn is_in_net6(ip: &str, networks: &str) -> Result<bool, String> {
    let Ok(addr) = ip.trim().parse::<IpAddr>() else {
        return Ok(false);
    };
    let mapped = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4),
        IpAddr::V4(_) => None,
    };
    for net in networks
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
    {
        let net = parse_net(net)?;
        if net.contains(&addr) || mapped.is_some_and(|m| net.contains(&m)) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn parse_net(s: &str) -> Result<IpNet, String> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    s.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| format!("invalid network `{s}`"))
}
