//! The dynamically-typed record tree produced by the decoder.
//!
//! A `Record` is a JSON object with insertion order preserved (serde_json is
//! built with `preserve_order`), so decoded field order survives every step.

use serde_json::{Map, Number, Value};

pub type Record = Map<String, Value>;

//==================================================================================
// 1. Reserved Field Names
//==================================================================================

pub const FIELD_MESSAGE_TYPE: &str = "_messageType";
pub const FIELD_DATA_LENGTH: &str = "_dataLength";
pub const FIELD_DB_METADATA: &str = "_dbMetadata";
pub const FIELD_LOCAL_DATE_TIME: &str = "_db_localDateTime";
pub const FIELD_HEADER: &str = "_header";
pub const FIELD_SCHEMA_VERSION: &str = "_schemaVersion";
pub const FIELD_SCHEMA_DESCRIPTION: &str = "_schemaDescription";
pub const FIELD_SCHEMA_FIELDS: &str = "_schemaFields";
pub const FIELD_SCHEMA_NAME: &str = "_schemaName";
pub const FIELD_TRANSACTION_ID: &str = "_cmlTransactionId";

/// Metadata key carrying the storage recovery key (arrival sequence number).
pub const META_RECOVERY_KEY: &str = "recoveryKey";
pub const META_LOG_OPERATION: &str = "logOperation";
pub const META_TABLE_NAME: &str = "tableName";
pub const META_DATE_TIME: &str = "dateTime";
pub const META_LOCAL_DATE_TIME: &str = "localDateTime";

//==================================================================================
// 2. Navigation
//==================================================================================

/// Steps one level into `value`: object member by name, array element by index.
pub fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Resolves a dotted path such as `_dbMetadata.recoveryKey` or `items.0.name`.
pub fn get_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = record.get(first)?;
    for segment in segments {
        current = child(current, segment)?;
    }
    Some(current)
}

/// The item's storage recovery key, as echoed into `_dbMetadata` by the decoder.
pub fn recovery_key(record: &Record) -> Option<f64> {
    record
        .get(FIELD_DB_METADATA)
        .and_then(|meta| child(meta, META_RECOVERY_KEY))
        .and_then(as_f64)
}

//==================================================================================
// 3. Conversions
//==================================================================================

/// Text form used for template substitution and comparisons.
/// Strings are unquoted, null is empty, containers are compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Numeric view of a value; numeric text is accepted.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalised map key for an identifier value, so that `7`, `7.0` and `"7"`
/// all address the same entity or correlation id.
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(format!("{}", f as i64)),
                _ => Some(trimmed.to_string()),
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            }
        }
    }
}

/// Wraps a float, mapping NaN and infinities to `null` since JSON cannot hold them.
pub fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        match json!({
            "_dbMetadata": {"recoveryKey": 25, "tableName": "Agent"},
            "items": [{"name": "a"}, {"name": "b"}],
            "count": 3
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_get_path() {
        let r = sample();
        assert_eq!(get_path(&r, "_dbMetadata.tableName"), Some(&json!("Agent")));
        assert_eq!(get_path(&r, "items.1.name"), Some(&json!("b")));
        assert_eq!(get_path(&r, "items.5.name"), None);
        assert_eq!(get_path(&r, "count.x"), None);
        assert_eq!(recovery_key(&r), Some(25.0));
    }

    #[test]
    fn test_id_key_normalisation() {
        assert_eq!(id_key(&json!(7)), Some("7".into()));
        assert_eq!(id_key(&json!(7.0)), Some("7".into()));
        assert_eq!(id_key(&json!(" 7 ")), Some("7".into()));
        assert_eq!(id_key(&json!("AB")), Some("AB".into()));
        assert_eq!(id_key(&json!("")), None);
        assert_eq!(id_key(&Value::Null), None);
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!("x")), "x");
        assert_eq!(value_to_text(&json!(null)), "");
        assert_eq!(value_to_text(&json!(12)), "12");
        assert_eq!(value_to_text(&json!({"a": 1})), "{\"a\":1}");
        assert_eq!(float_value(f64::NAN), Value::Null);
    }
}
