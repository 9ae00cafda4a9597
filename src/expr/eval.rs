//! Tree-walking evaluator.
//!
//! Values are borrowed from the scope wherever possible; only computed results
//! (literals, function outputs, comparisons) are owned.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;

use crate::error::CmlError;
use crate::expr::parser::{BinaryOp, Expr};
use crate::types::record::{as_f64, child, value_to_text};
use crate::types::Record;

static NULL: Value = Value::Null;

//==================================================================================
// 1. Operands & Scopes
//==================================================================================

/// An intermediate evaluation result.
#[derive(Debug, Clone)]
pub enum Operand<'a> {
    Borrowed(&'a Value),
    /// A whole record, kept by reference so that `item.x` never clones the item.
    Record(&'a Record),
    Owned(Value),
    Missing,
}

impl<'a> Operand<'a> {
    fn from_option(value: Option<&'a Value>) -> Self {
        value.map_or(Operand::Missing, Operand::Borrowed)
    }

    pub fn member(self, name: &str) -> Operand<'a> {
        match self {
            Operand::Borrowed(v) => Operand::from_option(child(v, name)),
            Operand::Record(r) => Operand::from_option(r.get(name)),
            Operand::Owned(v) => child(&v, name)
                .cloned()
                .map_or(Operand::Missing, Operand::Owned),
            Operand::Missing => Operand::Missing,
        }
    }

    fn index(self, index: &Value) -> Operand<'a> {
        match index {
            Value::Number(n) => match n.as_u64() {
                Some(i) => self.member(&i.to_string()),
                None => Operand::Missing,
            },
            Value::String(s) => self.member(s),
            _ => Operand::Missing,
        }
    }

    pub fn value(&self) -> Cow<'_, Value> {
        match self {
            Operand::Borrowed(v) => Cow::Borrowed(*v),
            Operand::Record(r) => Cow::Owned(Value::Object((*r).clone())),
            Operand::Owned(v) => Cow::Borrowed(v),
            Operand::Missing => Cow::Borrowed(&NULL),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Operand::Borrowed(v) => v.clone(),
            Operand::Record(r) => Value::Object(r.clone()),
            Operand::Owned(v) => v,
            Operand::Missing => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Operand::Missing => true,
            Operand::Record(_) => false,
            Operand::Borrowed(v) => v.is_null(),
            Operand::Owned(v) => v.is_null(),
        }
    }

    /// Text form for template output: strings unquoted, containers as JSON, null empty.
    pub fn to_text(&self) -> String {
        value_to_text(&self.value())
    }
}

/// Resolves the root identifiers of an expression.
pub trait Scope {
    fn root(&self, name: &str) -> Operand<'_>;
}

/// Root identifiers are the fields of a single record.
pub struct ItemScope<'a>(pub &'a Record);

impl Scope for ItemScope<'_> {
    fn root(&self, name: &str) -> Operand<'_> {
        Operand::from_option(self.0.get(name))
    }
}

/// `item`, `session` and `global` roots; any other root falls back to an item field.
pub struct EnvelopeScope<'a> {
    pub item: &'a Record,
    pub session: &'a Record,
    pub global: &'a Record,
}

impl Scope for EnvelopeScope<'_> {
    fn root(&self, name: &str) -> Operand<'_> {
        match name {
            "item" => Operand::Record(self.item),
            "session" => Operand::Record(self.session),
            "global" => Operand::Record(self.global),
            other => Operand::from_option(self.item.get(other)),
        }
    }
}

//==================================================================================
// 2. Evaluation
//==================================================================================

pub fn evaluate<'s>(expr: &Expr, scope: &'s dyn Scope) -> Result<Operand<'s>, CmlError> {
    match expr {
        Expr::Literal(v) => Ok(Operand::Owned(v.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|e| evaluate(e, scope).map(Operand::into_value))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Operand::Owned(Value::Array(values)))
        }
        Expr::Ident(name) => Ok(scope.root(name)),
        Expr::Member(base, name) => Ok(evaluate(base, scope)?.member(name)),
        Expr::Index(base, index) => {
            let index = evaluate(index, scope)?;
            let index = index.value();
            Ok(evaluate(base, scope)?.index(&index))
        }
        Expr::Not(inner) => {
            let value = evaluate(inner, scope)?;
            Ok(Operand::Owned(Value::Bool(!truthy(&value.value()))))
        }
        Expr::Binary(op, left, right) => evaluate_binary(*op, left, right, scope),
        Expr::Call(name, args) => call_function(name, args, scope),
    }
}

/// Evaluates and reduces to a boolean.
pub fn evaluate_bool(expr: &Expr, scope: &dyn Scope) -> Result<bool, CmlError> {
    let value = evaluate(expr, scope)?;
    let truth = truthy(&value.value());
    Ok(truth)
}

fn evaluate_binary<'s>(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &'s dyn Scope,
) -> Result<Operand<'s>, CmlError> {
    let result = match op {
        BinaryOp::And => evaluate_bool(left, scope)? && evaluate_bool(right, scope)?,
        BinaryOp::Or => evaluate_bool(left, scope)? || evaluate_bool(right, scope)?,
        _ => {
            let l = evaluate(left, scope)?;
            let r = evaluate(right, scope)?;
            let (l, r) = (l.value(), r.value());
            match op {
                BinaryOp::Eq => loose_eq(&l, &r),
                BinaryOp::NotEq => !loose_eq(&l, &r),
                BinaryOp::Lt => compare(&l, &r) == Some(Ordering::Less),
                BinaryOp::Le => matches!(compare(&l, &r), Some(Ordering::Less | Ordering::Equal)),
                BinaryOp::Gt => compare(&l, &r) == Some(Ordering::Greater),
                BinaryOp::Ge => matches!(compare(&l, &r), Some(Ordering::Greater | Ordering::Equal)),
                BinaryOp::In => contained_in(&l, &r),
                BinaryOp::And | BinaryOp::Or => false,
            }
        }
    };
    Ok(Operand::Owned(Value::Bool(result)))
}

//==================================================================================
// 3. Value Semantics
//==================================================================================

/// Null and missing are false; strings are true only when they read `true`.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Equality that lets numbers match numeric text (`7 == '7'`).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_f64(a), as_f64(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.trim().eq_ignore_ascii_case(&x.to_string())
        }
        _ => a == b,
    }
}

/// Numeric when both sides read as numbers, textual otherwise. Null never orders.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(value_to_text(a).cmp(&value_to_text(b))),
        },
    }
}

fn contained_in(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(needle, item)),
        Value::String(s) => s.contains(&value_to_text(needle)),
        Value::Object(map) => map.contains_key(&value_to_text(needle)),
        _ => false,
    }
}

//==================================================================================
// 4. Functions
//==================================================================================

fn call_function<'s>(
    name: &str,
    args: &[Expr],
    scope: &'s dyn Scope,
) -> Result<Operand<'s>, CmlError> {
    let lower = name.to_ascii_lowercase();

    // Functions that resolve against the scope rather than computing a value.
    match lower.as_str() {
        "eval" => {
            expect_arity(name, args, 1)?;
            let path = evaluate(&args[0], scope)?.to_text();
            return Ok(resolve_path(&path, scope));
        }
        "coalesce" => {
            for arg in args {
                let value = evaluate(arg, scope)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            return Ok(Operand::Missing);
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|e| evaluate(e, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let text = |i: usize| values[i].to_text();

    let result = match lower.as_str() {
        "concat" => Value::String(values.iter().map(Operand::to_text).collect()),
        "upper" | "uppercase" => {
            expect_arity(name, args, 1)?;
            Value::String(text(0).to_uppercase())
        }
        "lower" | "lowercase" => {
            expect_arity(name, args, 1)?;
            Value::String(text(0).to_lowercase())
        }
        "string" | "tostring" => {
            expect_arity(name, args, 1)?;
            Value::String(text(0))
        }
        "trim" => {
            expect_arity(name, args, 1)?;
            Value::String(text(0).trim().to_string())
        }
        "len" | "length" | "size" => {
            expect_arity(name, args, 1)?;
            let len = match &*values[0].value() {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => value_to_text(other).chars().count(),
            };
            Value::from(len)
        }
        "contains" => {
            expect_arity(name, args, 2)?;
            let haystack = values[0].value();
            match &*haystack {
                Value::Array(_) => Value::Bool(contained_in(&values[1].value(), &haystack)),
                _ => Value::Bool(text(0).contains(&text(1))),
            }
        }
        "startswith" => {
            expect_arity(name, args, 2)?;
            Value::Bool(text(0).starts_with(&text(1)))
        }
        "endswith" => {
            expect_arity(name, args, 2)?;
            Value::Bool(text(0).ends_with(&text(1)))
        }
        "exists" | "isnotnull" => {
            expect_arity(name, args, 1)?;
            Value::Bool(!values[0].is_null())
        }
        "isnull" => {
            expect_arity(name, args, 1)?;
            Value::Bool(values[0].is_null())
        }
        "in" => {
            if values.is_empty() {
                return Err(arity_error(name, 1, 0));
            }
            let needle = values[0].value();
            let rest = &values[1..];
            let found = match rest {
                [single] => {
                    let candidate = single.value();
                    match &*candidate {
                        Value::Array(_) => contained_in(&needle, &candidate),
                        other => loose_eq(&needle, other),
                    }
                }
                _ => rest.iter().any(|v| loose_eq(&needle, &v.value())),
            };
            Value::Bool(found)
        }
        _ => {
            return Err(CmlError::Expression(format!("unknown function '{name}'")));
        }
    };
    Ok(Operand::Owned(result))
}

/// Resolves a dotted path like `session.agents.7.name` against the scope.
pub fn resolve_path<'s>(path: &str, scope: &'s dyn Scope) -> Operand<'s> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return Operand::Missing;
    };
    segments.fold(scope.root(first), |acc, segment| acc.member(segment))
}

fn expect_arity(name: &str, args: &[Expr], expected: usize) -> Result<(), CmlError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(arity_error(name, expected, args.len()))
    }
}

fn arity_error(name: &str, expected: usize, actual: usize) -> CmlError {
    CmlError::Expression(format!(
        "function '{name}' expects {expected} argument(s), got {actual}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval_item(source: &str, item: &Record) -> Value {
        let expr = parse(source).unwrap();
        evaluate(&expr, &ItemScope(item)).unwrap().into_value()
    }

    #[test]
    fn test_comparisons_and_logic() {
        let item = record(json!({"status": "ERROR", "count": 3, "ratio": "2.5", "flag": true}));
        assert_eq!(eval_item("status == 'ERROR' && count > 2", &item), json!(true));
        assert_eq!(eval_item("count == '3'", &item), json!(true));
        assert_eq!(eval_item("ratio < 3", &item), json!(true));
        assert_eq!(eval_item("missing == null", &item), json!(true));
        assert_eq!(eval_item("missing > 1", &item), json!(false));
        assert_eq!(eval_item("not flag or count != 3", &item), json!(false));
        assert_eq!(eval_item("status in ['OK', 'ERROR']", &item), json!(true));
        assert_eq!(eval_item("status.in('OK', 'WARN')", &item), json!(false));
    }

    #[test]
    fn test_paths_and_indexing() {
        let item = record(json!({"_header": [1, 7, 3], "agent": {"name": "Ann"}}));
        assert_eq!(eval_item("_header[1]", &item), json!(7));
        assert_eq!(eval_item("_header.2", &item), json!(3));
        assert_eq!(eval_item("agent['name']", &item), json!("Ann"));
        assert_eq!(eval_item("agent.name.first", &item), Value::Null);
    }

    #[test]
    fn test_functions() {
        let item = record(json!({"first": "Ann", "last": null, "tags": ["a", "b"]}));
        assert_eq!(eval_item("concat(first, '-', 1)", &item), json!("Ann-1"));
        assert_eq!(eval_item("upper(first)", &item), json!("ANN"));
        assert_eq!(eval_item("first.lower()", &item), json!("ann"));
        assert_eq!(eval_item("coalesce(last, first)", &item), json!("Ann"));
        assert_eq!(eval_item("len(tags)", &item), json!(2));
        assert_eq!(eval_item("contains(tags, 'b')", &item), json!(true));
        assert_eq!(eval_item("startsWith(first, 'A')", &item), json!(true));
        assert_eq!(eval_item("exists(last)", &item), json!(false));
    }

    #[test]
    fn test_unknown_function_and_arity_errors() {
        let item = Record::new();
        let scope = ItemScope(&item);
        assert!(evaluate(&parse("frobnicate(1)").unwrap(), &scope).is_err());
        assert!(evaluate(&parse("upper(1, 2)").unwrap(), &scope).is_err());
    }

    #[test]
    fn test_envelope_and_eval_path() {
        let item = record(json!({"agentId": 7}));
        let session = record(json!({"sessionKey": "ABC"}));
        let global = record(json!({"env": {"name": "prod"}}));
        let scope = EnvelopeScope { item: &item, session: &session, global: &global };

        let expr = parse("concat(session.sessionKey, ':', item.agentId, ':', global.env.name)").unwrap();
        assert_eq!(evaluate(&expr, &scope).unwrap().into_value(), json!("ABC:7:prod"));

        let expr = parse("eval(concat('global.env.', 'name'))").unwrap();
        assert_eq!(evaluate(&expr, &scope).unwrap().into_value(), json!("prod"));

        // Bare roots fall back to item fields.
        assert_eq!(evaluate(&parse("agentId").unwrap(), &scope).unwrap().into_value(), json!(7));
    }

    #[test]
    fn test_truthiness() {
        assert!(truthy(&json!("TRUE")));
        assert!(!truthy(&json!("yes")));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!(0.0)));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!({"a": 1})));
    }
}
