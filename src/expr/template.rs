//! `{{ expression }}` text templates.
//!
//! Placeholders are classified once at compile time. Two shapes skip the
//! general evaluator entirely:
//!
//! * `eval(concat('session.<map>.', item.<id>)).<prop>` becomes a direct
//!   entity-map lookup.
//! * `item.<field>` becomes a plain field read.
//!
//! Everything else is parsed and evaluated against the envelope scope.

use log::warn;
use serde_json::Value;

use crate::expr::eval::{evaluate, EnvelopeScope};
use crate::expr::parser::{parse, Expr};
use crate::types::record::{child, id_key, value_to_text};
use crate::types::Record;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Supplies preloaded entities by map name and normalised id.
pub trait EntitySource {
    fn entity(&self, map: &str, id: &str) -> Option<&Value>;
}

/// An entity source with nothing in it.
pub struct NoEntities;

impl EntitySource for NoEntities {
    fn entity(&self, _map: &str, _id: &str) -> Option<&Value> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Placeholder {
    EntityLookup {
        map: String,
        id_path: Vec<String>,
        props: Vec<String>,
    },
    ItemField {
        path: Vec<String>,
    },
    General(Expr),
    /// Did not parse; renders as empty text.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Slot(Placeholder),
}

#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn compile(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            let consumed = start + OPEN.len() + end + CLOSE.len();
            let inner = after_open[..end].trim();
            if inner.is_empty() {
                // An empty `{{}}` is literal text.
                text.push_str(&rest[..consumed]);
            } else {
                text.push_str(&rest[..start]);
                if !text.is_empty() {
                    parts.push(Part::Text(std::mem::take(&mut text)));
                }
                parts.push(Part::Slot(classify(inner)));
            }
            rest = &rest[consumed..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }

        Self { source: source.to_string(), parts }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.parts.iter().filter_map(|part| match part {
            Part::Slot(p) => Some(p),
            Part::Text(_) => None,
        })
    }

    /// Entity maps referenced through the lookup fast path.
    pub fn entity_maps(&self) -> impl Iterator<Item = &str> {
        self.placeholders().filter_map(|p| match p {
            Placeholder::EntityLookup { map, .. } => Some(map.as_str()),
            _ => None,
        })
    }

    /// True when some placeholder needs the general evaluator.
    pub fn needs_evaluator(&self) -> bool {
        self.placeholders().any(|p| matches!(p, Placeholder::General(_)))
    }

    pub fn render(&self, scope: &EnvelopeScope<'_>, entities: &dyn EntitySource) -> String {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Slot(placeholder) => out.push_str(&render_placeholder(placeholder, scope, entities)),
            }
        }
        out
    }
}

fn render_placeholder(
    placeholder: &Placeholder,
    scope: &EnvelopeScope<'_>,
    entities: &dyn EntitySource,
) -> String {
    match placeholder {
        Placeholder::EntityLookup { map, id_path, props } => {
            let entity = path_value(scope.item, id_path)
                .and_then(id_key)
                .and_then(|id| entities.entity(map, &id));
            let mut value = entity;
            for prop in props {
                value = value.and_then(|v| child(v, prop));
            }
            value.map(value_to_text).unwrap_or_default()
        }
        Placeholder::ItemField { path } => path_value(scope.item, path)
            .map(value_to_text)
            .unwrap_or_default(),
        Placeholder::General(expr) => match evaluate(expr, scope) {
            Ok(value) => value.to_text(),
            Err(e) => {
                warn!("Template expression failed: {e}");
                String::new()
            }
        },
        Placeholder::Invalid(_) => String::new(),
    }
}

fn path_value<'a>(item: &'a Record, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(item.get(first.as_str())?, |acc, segment| child(acc, segment))
}

//==================================================================================
// Classification
//==================================================================================

fn classify(inner: &str) -> Placeholder {
    let expr = match parse(inner) {
        Ok(expr) => expr,
        Err(e) => {
            warn!("Invalid template placeholder '{{{{{inner}}}}}': {e}");
            return Placeholder::Invalid(inner.to_string());
        }
    };

    if let Some(lookup) = entity_lookup(&expr) {
        return lookup;
    }
    if let Some(path) = item_path(&expr) {
        return Placeholder::ItemField { path };
    }
    Placeholder::General(expr)
}

/// `item.a.b` → `["a", "b"]`.
fn item_path(expr: &Expr) -> Option<Vec<String>> {
    let mut path = expr.member_path()?;
    if path.len() < 2 || path[0] != "item" {
        return None;
    }
    path.remove(0);
    Some(path)
}

fn entity_lookup(expr: &Expr) -> Option<Placeholder> {
    // Peel trailing `.prop` members off the eval call.
    let mut props = Vec::new();
    let mut base = expr;
    while let Expr::Member(inner, name) = base {
        props.push(name.clone());
        base = inner;
    }
    if props.is_empty() {
        return None;
    }
    props.reverse();

    let Expr::Call(name, args) = base else {
        return None;
    };
    if name != "eval" || args.len() != 1 {
        return None;
    }
    let Expr::Call(concat, parts) = &args[0] else {
        return None;
    };
    let [Expr::Literal(Value::String(prefix)), id_expr] = parts.as_slice() else {
        return None;
    };
    if concat != "concat" {
        return None;
    }

    let map = prefix.strip_prefix("session.")?.strip_suffix('.')?;
    if map.is_empty() || map.contains('.') {
        return None;
    }
    let id_path = item_path(id_expr)?;

    Some(Placeholder::EntityLookup {
        map: map.to_string(),
        id_path,
        props,
    })
}
