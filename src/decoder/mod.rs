//! The schema-driven binary decoder.
//!
//! `BinaryDecoder::decode` turns `(message type, bytes, metadata)` into a
//! [`Record`]. Layout is little-endian throughout:
//!
//! 1. six signed 32-bit header words, always present;
//! 2. the schema's fields in declaration order, with no framing between them;
//! 3. optionally a trailing array that runs to the end of the buffer.
//!
//! Unknown message types are not an error: the record stops after the header
//! and metadata fields. Any structural problem with a known schema fails the
//! whole record.

pub mod batch;
pub mod cursor;
pub mod encoder;

#[cfg(test)]
mod decoder_tests;

pub use batch::{
    decode_batch, decode_batch_lossy, message_type_for, select_page, DecodeSummary, RawMessage,
};
pub use cursor::ByteCursor;
pub use encoder::RecordEncoder;

use std::sync::Arc;

use serde_json::Value;

use crate::error::CmlError;
use crate::schema::{FieldDefinition, Schema, SchemaCatalog};
use crate::types::record::*;
use crate::types::{FieldType, Record};

/// Number of 32-bit words in the fixed header.
pub const HEADER_WORDS: usize = 6;
pub const HEADER_LEN: usize = HEADER_WORDS * 4;

/// Object nesting deeper than this is treated as a cyclic schema reference.
pub const MAX_NESTING_DEPTH: usize = 32;

#[derive(Clone)]
pub struct BinaryDecoder {
    catalog: Arc<dyn SchemaCatalog>,
}

impl BinaryDecoder {
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn SchemaCatalog> {
        &self.catalog
    }

    /// Decodes one message.
    ///
    /// `metadata` is echoed verbatim under `_dbMetadata`; only `localDateTime`
    /// is looked at, to fill `_db_localDateTime`.
    pub fn decode(
        &self,
        message_type: &str,
        buffer: &[u8],
        metadata: &Record,
    ) -> Result<Record, CmlError> {
        self.decode_inner(message_type, buffer, metadata)
            .map_err(|e| e.in_message(message_type))
    }

    fn decode_inner(
        &self,
        message_type: &str,
        buffer: &[u8],
        metadata: &Record,
    ) -> Result<Record, CmlError> {
        let mut record = Record::new();
        record.insert(FIELD_MESSAGE_TYPE.into(), Value::from(message_type));
        record.insert(FIELD_DATA_LENGTH.into(), Value::from(buffer.len()));
        record.insert(FIELD_DB_METADATA.into(), Value::Object(metadata.clone()));
        let local_date_time = metadata
            .get(META_LOCAL_DATE_TIME)
            .map(value_to_text)
            .unwrap_or_default();
        record.insert(FIELD_LOCAL_DATE_TIME.into(), Value::from(local_date_time));

        let mut cursor = ByteCursor::new(buffer);
        let mut header = Vec::with_capacity(HEADER_WORDS);
        for i in 0..HEADER_WORDS {
            let word: i32 = cursor.read_le(&format!("{FIELD_HEADER}[{i}]"))?;
            header.push(Value::from(word));
        }
        record.insert(FIELD_HEADER.into(), Value::Array(header));

        let schema = match self.catalog.lookup(message_type) {
            Ok(schema) => schema,
            Err(CmlError::SchemaNotFound(_)) => {
                log::debug!(
                    "No schema for message type '{}', returning header and metadata only",
                    message_type
                );
                return Ok(record);
            }
            Err(e) => return Err(e),
        };

        schema.validate()?;
        record.insert(FIELD_SCHEMA_VERSION.into(), Value::from(schema.version));
        record.insert(
            FIELD_SCHEMA_DESCRIPTION.into(),
            Value::from(schema.description.clone()),
        );
        record.insert(FIELD_SCHEMA_FIELDS.into(), Value::from(schema.fields.len()));
        record.insert(
            FIELD_SCHEMA_NAME.into(),
            Value::from(schema.message_type.clone()),
        );

        self.decode_fields(&schema, &mut cursor, &mut record, 0)?;

        if !cursor.is_exhausted() {
            log::debug!(
                "'{}' left {} undecoded bytes after the last field",
                message_type,
                cursor.remaining()
            );
        }
        Ok(record)
    }

    fn decode_fields(
        &self,
        schema: &Schema,
        cursor: &mut ByteCursor<'_>,
        out: &mut Record,
        depth: usize,
    ) -> Result<(), CmlError> {
        for field in &schema.fields {
            let value = if field.is_array {
                self.decode_array(field, cursor, depth)?
            } else {
                self.decode_value(field, cursor, depth)?
            };
            out.insert(field.name.clone(), value);
        }
        Ok(())
    }

    /// Reads elements until the buffer is exhausted.
    ///
    /// A final element that cannot be completed from the remaining bytes is an
    /// error rather than a silently dropped tail.
    fn decode_array(
        &self,
        field: &FieldDefinition,
        cursor: &mut ByteCursor<'_>,
        depth: usize,
    ) -> Result<Value, CmlError> {
        let mut items = Vec::new();
        while !cursor.is_exhausted() {
            let start = cursor.position();
            match self.decode_value(field, cursor, depth) {
                Ok(value) => {
                    if cursor.position() == start {
                        return Err(CmlError::ZeroWidthElement(field.name.clone()));
                    }
                    items.push(value);
                }
                Err(CmlError::BufferUnderrun { .. }) => {
                    return Err(CmlError::ArrayTrailingBytes {
                        field: field.name.clone(),
                        remaining: cursor.len() - start,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Value::Array(items))
    }

    fn decode_value(
        &self,
        field: &FieldDefinition,
        cursor: &mut ByteCursor<'_>,
        depth: usize,
    ) -> Result<Value, CmlError> {
        let name = field.name.as_str();
        let value = match field.field_type {
            FieldType::Byte => Value::from(cursor.read_le::<u8>(name)?),
            FieldType::Short => Value::from(cursor.read_le::<u16>(name)?),
            FieldType::Integer => Value::from(u64::from(cursor.read_le::<u32>(name)?)),
            FieldType::Long => Value::from(cursor.read_le::<i64>(name)?),
            FieldType::Float => float_value(f64::from(cursor.read_f32(name)?)),
            FieldType::Double => float_value(cursor.read_f64(name)?),
            FieldType::Char => Value::from(char::from(cursor.read_le::<u8>(name)?).to_string()),
            FieldType::String => Value::from(decode_string(field, cursor)?),
            FieldType::Object => self.decode_object(field, cursor, depth)?,
        };
        Ok(value)
    }

    fn decode_object(
        &self,
        field: &FieldDefinition,
        cursor: &mut ByteCursor<'_>,
        depth: usize,
    ) -> Result<Value, CmlError> {
        if depth + 1 > MAX_NESTING_DEPTH {
            return Err(CmlError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let nested_name = field.nested_schema.as_deref().ok_or_else(|| {
            CmlError::InvalidSchema(format!("object field '{}' has no nestedSchema", field.name))
        })?;
        // A missing nested schema makes the parent undecodable, so it is not a soft miss here.
        let nested = self.catalog.lookup(nested_name).map_err(|e| match e {
            CmlError::SchemaNotFound(s) => CmlError::InvalidSchema(format!(
                "field '{}' references unknown nested schema '{}'",
                field.name, s
            )),
            other => other,
        })?;
        nested.validate()?;

        let mut child = Record::new();
        self.decode_fields(&nested, cursor, &mut child, depth + 1)?;
        Ok(Value::Object(child))
    }
}

/// Reads a length-prefixed, NUL-terminated string and skips its padding.
fn decode_string(field: &FieldDefinition, cursor: &mut ByteCursor<'_>) -> Result<String, CmlError> {
    let len = usize::from(cursor.read_le::<u16>(&field.name)?);
    let bytes = cursor.take(len + 1, &field.name)?;
    let text = String::from_utf8_lossy(&bytes[..len]).into_owned();
    cursor.skip(field.string_padding.padding_for(len), &field.name)?;
    Ok(text)
}
