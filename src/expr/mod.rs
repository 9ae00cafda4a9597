//! Condition and template expressions over JSON records.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod template;

use std::collections::BTreeSet;

pub use eval::{evaluate, EnvelopeScope, ItemScope, Operand, Scope};
pub use parser::{parse, BinaryOp, Expr};
pub use template::{EntitySource, NoEntities, Placeholder, Template};

use crate::error::CmlError;
use crate::types::Record;

/// A boolean filter. Blank text and the literal `true` skip evaluation entirely.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Option<Expr>,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, CmlError> {
        let trimmed = source.trim();
        let expr = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("true") {
            None
        } else {
            Some(parser::parse(trimmed)?)
        };
        Ok(Self { source: trimmed.to_string(), expr })
    }

    pub fn always() -> Self {
        Self { source: "true".to_string(), expr: None }
    }

    pub fn is_always(&self) -> bool {
        self.expr.is_none()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates with the item's fields as roots.
    pub fn matches(&self, item: &Record) -> Result<bool, CmlError> {
        self.matches_in(&ItemScope(item))
    }

    pub fn matches_in(&self, scope: &dyn Scope) -> Result<bool, CmlError> {
        match &self.expr {
            None => Ok(true),
            Some(expr) => eval::evaluate_bool(expr, scope),
        }
    }

    /// True when the outcome depends only on `field`, so it can be cached per
    /// distinct value of that field.
    pub fn depends_only_on(&self, field: &str) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => !expr.calls("eval") && expr.roots().iter().all(|r| r == field),
        }
    }

    /// Root identifiers the condition reads.
    pub fn roots(&self) -> BTreeSet<String> {
        self.expr.as_ref().map(Expr::roots).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_always_forms() {
        assert!(Condition::parse("").unwrap().is_always());
        assert!(Condition::parse("  TRUE ").unwrap().is_always());
        assert!(!Condition::parse("a == 1").unwrap().is_always());
        assert!(Condition::parse("a ==").is_err());
    }

    #[test]
    fn test_condition_matches_and_roots() {
        let cond = Condition::parse("_messageType == 'AGENT_STATE' && _header[1] > 0").unwrap();
        let item = json!({"_messageType": "AGENT_STATE", "_header": [0, 5]});
        let item = item.as_object().unwrap();
        assert!(cond.matches(item).unwrap());
        assert!(!cond.depends_only_on("_messageType"));
        assert!(Condition::parse("_messageType in ('A', 'B')").unwrap().depends_only_on("_messageType"));
        assert_eq!(
            cond.roots().into_iter().collect::<Vec<_>>(),
            vec!["_header".to_string(), "_messageType".to_string()]
        );
    }
}
