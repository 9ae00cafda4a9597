//! Explodes array fields into one item per element.
//!
//! Output items are concatenated across arrays (never a cross product). Each
//! carries the original item's fields minus the unwrapped arrays, optionally
//! narrowed to `fieldsToCopy`, plus the element index, the optional source
//! array name and finally the element's own fields.

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, ItemAction, StepAction};
use crate::types::record::{value_to_text, FIELD_MESSAGE_TYPE};
use crate::types::Record;

pub const ID: &str = "array_unwrap";

fn default_index_field() -> String {
    "idx".to_string()
}

fn default_discriminator() -> String {
    FIELD_MESSAGE_TYPE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayUnwrapParams {
    #[serde(default)]
    pub arrays_to_unwrap: Vec<String>,
    /// Per-type array lists, selected by `discriminatorField`.
    #[serde(default)]
    pub mappings: HashMap<String, Vec<String>>,
    #[serde(default = "default_discriminator")]
    pub discriminator_field: String,
    #[serde(default)]
    pub fields_to_copy: Vec<String>,
    #[serde(default = "default_index_field")]
    pub index_field_name: String,
    #[serde(default)]
    pub array_key_field_name: Option<String>,
}

#[derive(Debug)]
pub struct ArrayUnwrap {
    arrays: Vec<String>,
    mappings: HashMap<String, Vec<String>>,
    discriminator: String,
    copy: HashSet<String>,
    index_field: String,
    array_key_field: Option<String>,
}

fn clean(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

impl ArrayUnwrap {
    pub fn new(params: ArrayUnwrapParams) -> Self {
        let arrays = clean(params.arrays_to_unwrap);
        let mappings: HashMap<String, Vec<String>> = params
            .mappings
            .into_iter()
            .map(|(k, v)| (k, clean(v)))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        if arrays.is_empty() && mappings.is_empty() {
            warn!("No arrays configured to unwrap, every item will pass through");
        }

        let index_field = match params.index_field_name.trim() {
            "" => default_index_field(),
            name => name.to_string(),
        };
        let array_key_field = params
            .array_key_field_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Self {
            arrays,
            mappings,
            discriminator: params.discriminator_field,
            copy: clean(params.fields_to_copy).into_iter().collect(),
            index_field,
            array_key_field,
        }
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        Ok(StepAction::item(Self::new(spec.params()?)))
    }

    /// Array names applicable to `item`. With mappings configured only the item's
    /// type decides; an unmapped type unwraps nothing.
    fn arrays_for(&self, item: &Record) -> &[String] {
        if self.mappings.is_empty() {
            return &self.arrays;
        }
        item.get(&self.discriminator)
            .map(value_to_text)
            .and_then(|kind| self.mappings.get(&kind))
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn unwrap_item(&self, original: Record) -> Vec<Record> {
        let names = self.arrays_for(&original);
        let targets: Vec<(&String, &Vec<Value>)> = names
            .iter()
            .filter_map(|name| match original.get(name) {
                Some(Value::Array(items)) if !items.is_empty() => Some((name, items)),
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return vec![original];
        }

        let mut base = original.clone();
        base.retain(|key, _| {
            !names.contains(key) && (self.copy.is_empty() || self.copy.contains(key))
        });

        let mut out = Vec::new();
        for (array_name, elements) in targets {
            for (idx, element) in elements.iter().enumerate() {
                let Value::Object(fields) = element else {
                    debug!("Non-object element {idx} in '{array_name}' skipped");
                    continue;
                };
                let mut item = base.clone();
                item.insert(self.index_field.clone(), Value::from(idx));
                if let Some(key_field) = &self.array_key_field {
                    item.insert(key_field.clone(), Value::String(array_name.clone()));
                }
                for (k, v) in fields {
                    item.insert(k.clone(), v.clone());
                }
                out.push(item);
            }
        }
        out
    }
}

impl ItemAction for ArrayUnwrap {
    fn apply(&self, item: Record, _ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        Ok(self.unwrap_item(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(params: Value) -> ArrayUnwrap {
        ArrayUnwrap::new(serde_json::from_value(params).unwrap())
    }

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_concatenates_arrays_with_indexes() {
        let unwrap = action(json!({
            "arraysToUnwrap": ["calls", "skills", "missing"],
            "fieldsToCopy": ["agent"],
            "arrayKeyFieldName": "source"
        }));
        let item = record(json!({
            "agent": 7,
            "noise": "x",
            "calls": [{"id": "c1"}, 5, {"id": "c3", "agent": 99}],
            "skills": [{"skill": "s1"}]
        }));

        let out = unwrap.unwrap_item(item);
        let out: Vec<Value> = out.into_iter().map(Value::Object).collect();
        assert_eq!(
            out,
            vec![
                json!({"agent": 7, "idx": 0, "source": "calls", "id": "c1"}),
                json!({"agent": 99, "idx": 2, "source": "calls", "id": "c3"}),
                json!({"agent": 7, "idx": 0, "source": "skills", "skill": "s1"}),
            ]
        );
    }

    #[test]
    fn test_items_without_arrays_pass_through() {
        let unwrap = action(json!({"arraysToUnwrap": ["calls"]}));
        for item in [
            record(json!({"a": 1})),
            record(json!({"calls": []})),
            record(json!({"calls": "not an array"})),
        ] {
            assert_eq!(unwrap.unwrap_item(item.clone()), vec![item]);
        }
    }

    #[test]
    fn test_all_fields_kept_without_copy_list() {
        let unwrap = action(json!({"arraysToUnwrap": ["rows"], "indexFieldName": "n"}));
        let out = unwrap.unwrap_item(record(json!({"a": 1, "b": 2, "rows": [{"c": 3}, {"c": 4}]})));
        assert_eq!(out.len(), 2);
        assert_eq!(Value::Object(out[1].clone()), json!({"a": 1, "b": 2, "n": 1, "c": 4}));
    }

    #[test]
    fn test_mappings_select_arrays_by_type() {
        let unwrap = action(json!({
            "mappings": {"AGENT_STATE": ["skills"], "CALL": ["legs"]},
        }));
        let agent = record(json!({"_messageType": "AGENT_STATE", "skills": [{"s": 1}], "legs": [{"l": 1}]}));
        let out = unwrap.unwrap_item(agent);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains_key("legs"));
        assert!(!out[0].contains_key("skills"));

        let other = record(json!({"_messageType": "OTHER", "skills": [{"s": 1}]}));
        assert_eq!(unwrap.unwrap_item(other.clone()), vec![other]);
    }

    #[test]
    fn test_mappings_override_default_list_for_unmapped_types() {
        let unwrap = action(json!({
            "mappings": {"AGENT_STATE": ["skills"]},
            "arraysToUnwrap": ["skills"],
        }));
        let other = record(json!({"_messageType": "OTHER", "skills": [{"s": 1}, {"s": 2}]}));
        let out = unwrap.unwrap_item(other.clone());
        assert_eq!(out.len(), 1);
        assert_eq!(out, vec![other]);

        let untyped = record(json!({"skills": [{"s": 1}, {"s": 2}]}));
        assert_eq!(unwrap.unwrap_item(untyped.clone()), vec![untyped]);

        let agent = record(json!({"_messageType": "AGENT_STATE", "skills": [{"s": 1}, {"s": 2}]}));
        assert_eq!(unwrap.unwrap_item(agent).len(), 2);
    }

    #[test]
    fn test_only_non_object_elements_drop_the_item() {
        let unwrap = action(json!({"arraysToUnwrap": ["xs"]}));
        assert!(unwrap.unwrap_item(record(json!({"xs": [1, 2]}))).is_empty());
    }
}
