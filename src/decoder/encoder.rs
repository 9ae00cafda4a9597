//! The inverse of [`BinaryDecoder`](super::BinaryDecoder): lays a record out
//! on the wire according to its schema.
//!
//! Used to build fixtures and benchmark payloads; producing byte-exact input
//! for the decoder is what keeps element widths honest.

use std::sync::Arc;

use serde_json::Value;

use crate::decoder::HEADER_WORDS;
use crate::error::CmlError;
use crate::schema::{FieldDefinition, Schema, SchemaCatalog};
use crate::types::{FieldType, Record};

pub struct RecordEncoder {
    catalog: Arc<dyn SchemaCatalog>,
}

impl RecordEncoder {
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self { catalog }
    }

    /// Encodes the header followed by every schema field taken from `record`.
    pub fn encode(
        &self,
        message_type: &str,
        header: [i32; HEADER_WORDS],
        record: &Record,
    ) -> Result<Vec<u8>, CmlError> {
        let schema = self.catalog.lookup(message_type)?;
        schema.validate()?;
        let mut out = Vec::with_capacity(64);
        for word in header {
            out.extend_from_slice(&word.to_le_bytes());
        }
        self.encode_fields(&schema, record, &mut out)?;
        Ok(out)
    }

    fn encode_fields(&self, schema: &Schema, record: &Record, out: &mut Vec<u8>) -> Result<(), CmlError> {
        for field in &schema.fields {
            let value = record.get(&field.name).ok_or_else(|| CmlError::EncodeFailed {
                field: field.name.clone(),
                reason: "missing from record".to_string(),
            })?;
            if field.is_array {
                let items = value.as_array().ok_or_else(|| mismatch(field, value))?;
                for item in items {
                    self.encode_value(field, item, out)?;
                }
            } else {
                self.encode_value(field, value, out)?;
            }
        }
        Ok(())
    }

    fn encode_value(&self, field: &FieldDefinition, value: &Value, out: &mut Vec<u8>) -> Result<(), CmlError> {
        match field.field_type {
            FieldType::Byte => out.push(integer::<u8>(field, value)?),
            FieldType::Short => out.extend_from_slice(&integer::<u16>(field, value)?.to_le_bytes()),
            FieldType::Integer => out.extend_from_slice(&integer::<u32>(field, value)?.to_le_bytes()),
            FieldType::Long => {
                let v = value.as_i64().ok_or_else(|| mismatch(field, value))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldType::Float => {
                let v = value.as_f64().ok_or_else(|| mismatch(field, value))? as f32;
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldType::Double => {
                let v = value.as_f64().ok_or_else(|| mismatch(field, value))?;
                out.extend_from_slice(&v.to_le_bytes());
            }
            FieldType::Char => {
                let byte = match value {
                    Value::String(s) => s
                        .chars()
                        .next()
                        .and_then(|c| u8::try_from(u32::from(c)).ok())
                        .ok_or_else(|| mismatch(field, value))?,
                    _ => integer::<u8>(field, value)?,
                };
                out.push(byte);
            }
            FieldType::String => {
                let text = value.as_str().ok_or_else(|| mismatch(field, value))?;
                let len = u16::try_from(text.len()).map_err(|_| CmlError::EncodeFailed {
                    field: field.name.clone(),
                    reason: format!("string of {} bytes exceeds u16 length prefix", text.len()),
                })?;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(text.as_bytes());
                out.push(0);
                out.resize(out.len() + field.string_padding.padding_for(text.len()), 0);
            }
            FieldType::Object => {
                let nested_name = field.nested_schema.as_deref().unwrap_or_default();
                let nested = self.catalog.lookup(nested_name)?;
                let child = value.as_object().ok_or_else(|| mismatch(field, value))?;
                self.encode_fields(&nested, child, out)?;
            }
        }
        Ok(())
    }
}

fn integer<T: TryFrom<u64>>(field: &FieldDefinition, value: &Value) -> Result<T, CmlError> {
    value
        .as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| mismatch(field, value))
}

fn mismatch(field: &FieldDefinition, value: &Value) -> CmlError {
    CmlError::EncodeFailed {
        field: field.name.clone(),
        reason: format!("value {} does not fit {}", value, field.field_type),
    }
}
