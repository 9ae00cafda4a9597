//! Message schemas: the ordered field lists that drive the binary decoder.
//!
//! Schemas are plain JSON documents. A `Schema` is immutable once loaded; the
//! [`SchemaRegistry`] swaps whole maps of them atomically on reload.

pub mod registry;

pub use registry::{SchemaCatalog, SchemaRegistry};

use serde::{Deserialize, Serialize};

use crate::error::CmlError;
use crate::types::{FieldType, PaddingType};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_array: bool,
    /// Message type of the schema used for `OBJECT` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_schema: Option<String>,
    #[serde(default)]
    pub string_padding: PaddingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_array: false,
            nested_schema: None,
            string_padding: PaddingType::default(),
            description: None,
        }
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn nested(mut self, schema: impl Into<String>) -> Self {
        self.nested_schema = Some(schema.into());
        self
    }

    pub fn padding(mut self, padding: PaddingType) -> Self {
        self.string_padding = padding;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub message_type: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl Schema {
    pub fn new(message_type: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            message_type: message_type.into(),
            version: 1,
            description: String::new(),
            fields,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CmlError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the structural rules the decoder relies on:
    /// an array field may only be the last field, and every `OBJECT` field
    /// names the schema it nests.
    pub fn validate(&self) -> Result<(), CmlError> {
        if self.message_type.trim().is_empty() {
            return Err(CmlError::InvalidSchema(
                "schema has a blank messageType".to_string(),
            ));
        }
        let last = self.fields.len().saturating_sub(1);
        for (i, field) in self.fields.iter().enumerate() {
            if field.is_array && i != last {
                return Err(CmlError::InvalidSchema(format!(
                    "array field '{}' must be the last field in schema '{}'",
                    field.name, self.message_type
                )));
            }
            if field.field_type == FieldType::Object
                && field.nested_schema.as_deref().map_or(true, |s| s.trim().is_empty())
            {
                return Err(CmlError::InvalidSchema(format!(
                    "object field '{}' in schema '{}' has no nestedSchema",
                    field.name, self.message_type
                )));
            }
        }
        Ok(())
    }

    pub fn array_field(&self) -> Option<&FieldDefinition> {
        self.fields.last().filter(|f| f.is_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_document() {
        let schema = Schema::from_json_str(
            r#"{
                "messageType": "AGENT__ADD",
                "version": 3,
                "description": "agent created",
                "fields": [
                    {"name": "agentId", "type": "INTEGER"},
                    {"name": "name", "type": "STRING", "stringPadding": "FIXED_1"},
                    {"name": "skills", "type": "OBJECT", "nestedSchema": "SKILL", "isArray": true}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(schema.version, 3);
        assert_eq!(schema.fields[0].string_padding, PaddingType::Align4);
        assert_eq!(schema.fields[1].string_padding, PaddingType::Fixed1);
        assert_eq!(schema.array_field().map(|f| f.name.as_str()), Some("skills"));
        schema.validate().unwrap();
    }

    #[test]
    fn test_array_not_last_fails_validation() {
        let schema = Schema::new(
            "BAD",
            vec![
                FieldDefinition::new("ids", FieldType::Integer).array(),
                FieldDefinition::new("tail", FieldType::Byte),
            ],
        );
        assert!(matches!(schema.validate(), Err(CmlError::InvalidSchema(_))));
    }

    #[test]
    fn test_two_arrays_fail_validation() {
        let schema = Schema::new(
            "BAD",
            vec![
                FieldDefinition::new("a", FieldType::Byte).array(),
                FieldDefinition::new("b", FieldType::Byte).array(),
            ],
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_object_without_reference_fails_validation() {
        let schema = Schema::new("BAD", vec![FieldDefinition::new("o", FieldType::Object)]);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_unknown_field_type_is_a_parse_error() {
        let err = Schema::from_json_str(
            r#"{"messageType": "X", "fields": [{"name": "a", "type": "DECIMAL"}]}"#,
        );
        assert!(matches!(err, Err(CmlError::SerdeJson(_))));
    }
}
