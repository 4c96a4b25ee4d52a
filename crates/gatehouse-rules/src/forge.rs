//! Header forge: session attributes to outgoing headers.

use http::HeaderName;
use indexmap::IndexMap;

use crate::condition::ConditionCompiler;
use crate::error::{EvalError, RuleError, RuleResult};
use crate::eval::{EvalContext, Expr};

/// Compiled `exportedHeaders` of one virtual host.
#[derive(Debug, Clone, Default)]
pub struct HeaderForge {
    entries: Vec<(HeaderName, Expr)>,
}

impl HeaderForge {
    /// Compile the ordered header map.
    pub fn compile(
        compiler: &ConditionCompiler,
        headers: &IndexMap<String, String>,
    ) -> RuleResult<Self> {
        let entries = headers
            .iter()
            .map(|(name, expression)| {
                let header = HeaderName::from_bytes(name.trim().as_bytes())
                    .map_err(|_| RuleError::HeaderName(name.clone()))?;
                Ok((header, compiler.compile_expression(expression)?))
            })
            .collect::<RuleResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Forge that exports nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Evaluate every header in declared order.
    pub fn forge(&self, ctx: &EvalContext<'_>) -> Result<Vec<(HeaderName, String)>, EvalError> {
        self.entries
            .iter()
            .map(|(name, expr)| Ok((name.clone(), expr.eval(ctx)?.to_text())))
            .collect()
    }

    /// Exported header names.
    pub fn names(&self) -> impl Iterator<Item = &HeaderName> {
        self.entries.iter().map(|(name, _)| name)
    }

    /// Whether no header is exported.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
