use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::DecodeConfig;
use crate::decoder::*;
use crate::error::CmlError;
use crate::schema::{FieldDefinition, Schema, SchemaRegistry};
use crate::types::{FieldType, PaddingType, Record};

// Test Helpers
fn obj(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn registry() -> Arc<SchemaRegistry> {
    let agent = Schema {
        message_type: "ADD__AGENT".into(),
        version: 2,
        description: "agent added".into(),
        fields: vec![
            FieldDefinition::new("agentId", FieldType::Integer),
            FieldDefinition::new("flags", FieldType::Byte),
            FieldDefinition::new("kind", FieldType::Char),
            FieldDefinition::new("port", FieldType::Short),
            FieldDefinition::new("balance", FieldType::Long),
            FieldDefinition::new("ratio", FieldType::Float),
            FieldDefinition::new("score", FieldType::Double),
            FieldDefinition::new("name", FieldType::String),
            FieldDefinition::new("team", FieldType::Object).nested("TEAM_REF"),
            FieldDefinition::new("skills", FieldType::Object).nested("SKILL_REF").array(),
        ],
    };
    let team = Schema::new(
        "TEAM_REF",
        vec![
            FieldDefinition::new("teamId", FieldType::Integer),
            FieldDefinition::new("teamName", FieldType::String).padding(PaddingType::Fixed2),
        ],
    );
    let skill = Schema::new(
        "SKILL_REF",
        vec![
            FieldDefinition::new("skillId", FieldType::Integer),
            FieldDefinition::new("label", FieldType::String).padding(PaddingType::Align4),
        ],
    );
    let ids = Schema::new(
        "IDS",
        vec![
            FieldDefinition::new("count", FieldType::Short),
            FieldDefinition::new("ids", FieldType::Integer).array(),
        ],
    );
    Arc::new(SchemaRegistry::from_schemas([agent, team, skill, ids]))
}

fn agent_record() -> Record {
    obj(json!({
        "agentId": 4_000_000_000u64,
        "flags": 200,
        "kind": "A",
        "port": 65000,
        "balance": -42,
        "ratio": 0.5,
        "score": 12.25,
        "name": "Jane Doe",
        "team": {"teamId": 9, "teamName": "Ops"},
        "skills": [
            {"skillId": 1, "label": "voice"},
            {"skillId": 2, "label": ""},
            {"skillId": 3, "label": "chat-xl"}
        ]
    }))
}

const HEADER: [i32; HEADER_WORDS] = [1, -2, 3, 4, 5, 6];

// Round trip & layout
#[test]
fn test_roundtrip_every_field_type() {
    let catalog = registry();
    let encoder = RecordEncoder::new(catalog.clone());
    let decoder = BinaryDecoder::new(catalog);
    let original = agent_record();

    let bytes = encoder.encode("ADD__AGENT", HEADER, &original).unwrap();
    let decoded = decoder.decode("ADD__AGENT", &bytes, &Record::new()).unwrap();

    for (key, value) in &original {
        assert_eq!(decoded.get(key), Some(value), "field {key}");
    }
    assert_eq!(decoded["_header"], json!([1, -2, 3, 4, 5, 6]));
    assert_eq!(decoded["_dataLength"], json!(bytes.len()));
    assert_eq!(decoded["_schemaName"], json!("ADD__AGENT"));
    assert_eq!(decoded["_schemaVersion"], json!(2));
    assert_eq!(decoded["_schemaFields"], json!(10));
    assert_eq!(decoded["_db_localDateTime"], json!(""));
}

#[test]
fn test_record_field_order_follows_schema() {
    let catalog = registry();
    let bytes = RecordEncoder::new(catalog.clone())
        .encode("ADD__AGENT", HEADER, &agent_record())
        .unwrap();
    let decoded = BinaryDecoder::new(catalog).decode("ADD__AGENT", &bytes, &Record::new()).unwrap();
    let keys: Vec<&str> = decoded.keys().map(String::as_str).collect();
    assert_eq!(
        &keys[..5],
        &["_messageType", "_dataLength", "_dbMetadata", "_db_localDateTime", "_header"]
    );
    assert_eq!(keys.last(), Some(&"skills"));
}

#[test]
fn test_integer_is_unsigned_and_header_is_signed() {
    let catalog = registry();
    let mut bytes = Vec::new();
    for word in [-1i32, 0, 0, 0, 0, 0] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes.extend_from_slice(&7u16.to_le_bytes());
    bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    let decoded = BinaryDecoder::new(catalog).decode("IDS", &bytes, &Record::new()).unwrap();
    assert_eq!(decoded["_header"][0], json!(-1));
    assert_eq!(decoded["ids"], json!([4_294_967_295u64]));
}

#[test]
fn test_string_padding_consumes_exact_bytes() {
    for padding in [PaddingType::Align4, PaddingType::Fixed2, PaddingType::Align2, PaddingType::None] {
        for len in [0usize, 1, 3, 4, 7] {
            let schema = Schema::new(
                "S",
                vec![
                    FieldDefinition::new("s", FieldType::String).padding(padding),
                    FieldDefinition::new("tail", FieldType::Byte),
                ],
            );
            let catalog = Arc::new(SchemaRegistry::from_schemas([schema]));
            let text = "x".repeat(len);

            let mut bytes = vec![0u8; HEADER_LEN];
            bytes.extend_from_slice(&(len as u16).to_le_bytes());
            bytes.extend_from_slice(text.as_bytes());
            bytes.push(0);
            let expected = match padding {
                PaddingType::Align4 => (2 + len + 1).div_ceil(4) * 4,
                PaddingType::Fixed2 => 2 + len + 1 + 2,
                PaddingType::Align2 => (2 + len + 1).div_ceil(2) * 2,
                _ => 2 + len + 1,
            };
            bytes.resize(HEADER_LEN + expected, 0xEE);
            // A marker byte right after the padding proves the cursor landed exactly there.
            bytes.push(0x5A);

            let decoded = BinaryDecoder::new(catalog)
                .decode("S", &bytes, &Record::new())
                .unwrap();
            assert_eq!(decoded["s"], json!(text), "{padding:?} len {len}");
            assert_eq!(decoded["tail"], json!(0x5A), "{padding:?} len {len}");
        }
    }
}

#[test]
fn test_string_is_utf8() {
    let schema = Schema::new("U", vec![FieldDefinition::new("s", FieldType::String)]);
    let catalog = Arc::new(SchemaRegistry::from_schemas([schema]));
    let record = obj(json!({"s": "Žilina"}));
    let bytes = RecordEncoder::new(catalog.clone()).encode("U", HEADER, &record).unwrap();
    let decoded = BinaryDecoder::new(catalog).decode("U", &bytes, &Record::new()).unwrap();
    assert_eq!(decoded["s"], json!("Žilina"));
}

// Unknown types & metadata
#[test]
fn test_unknown_type_returns_partial_record() {
    let decoder = BinaryDecoder::new(registry());
    let mut bytes = vec![0u8; HEADER_LEN];
    bytes.extend_from_slice(&[9, 9, 9]);
    let meta = obj(json!({"recoveryKey": 10, "localDateTime": "2024-05-01T10:00"}));

    let decoded = decoder.decode("NOPE__TABLE", &bytes, &meta).unwrap();
    assert_eq!(decoded["_messageType"], json!("NOPE__TABLE"));
    assert_eq!(decoded["_dbMetadata"], json!({"recoveryKey": 10, "localDateTime": "2024-05-01T10:00"}));
    assert_eq!(decoded["_db_localDateTime"], json!("2024-05-01T10:00"));
    assert_eq!(decoded.len(), 5);
    assert!(!decoded.contains_key("_schemaName"));
}

#[test]
fn test_short_header_is_an_error() {
    let decoder = BinaryDecoder::new(registry());
    let err = decoder.decode("NOPE", &[0u8; 10], &Record::new()).unwrap_err();
    assert!(matches!(err, CmlError::DecodeFailed { .. }));
}

// Structural errors
#[test]
fn test_invalid_schema_fails_before_reading_fields() {
    let bad = Schema::new(
        "BAD",
        vec![
            FieldDefinition::new("ids", FieldType::Integer).array(),
            FieldDefinition::new("tail", FieldType::Byte),
        ],
    );
    let decoder = BinaryDecoder::new(Arc::new(SchemaRegistry::from_schemas([bad])));
    let err = decoder.decode("BAD", &[0u8; HEADER_LEN + 8], &Record::new()).unwrap_err();
    assert!(matches!(err, CmlError::InvalidSchema(_)));
}

#[test]
fn test_truncated_known_record_is_fatal() {
    let catalog = registry();
    let bytes = RecordEncoder::new(catalog.clone())
        .encode("ADD__AGENT", HEADER, &agent_record())
        .unwrap();
    let decoder = BinaryDecoder::new(catalog);
    // Cut inside the `name` string, before the array starts.
    let err = decoder.decode("ADD__AGENT", &bytes[..HEADER_LEN + 30], &Record::new()).unwrap_err();
    match err {
        CmlError::DecodeFailed { message_type, source } => {
            assert_eq!(message_type, "ADD__AGENT");
            assert!(matches!(*source, CmlError::BufferUnderrun { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_array_with_partial_trailing_element_is_rejected() {
    let decoder = BinaryDecoder::new(registry());
    let mut bytes = vec![0u8; HEADER_LEN];
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&10u32.to_le_bytes());
    bytes.extend_from_slice(&20u32.to_le_bytes());
    bytes.extend_from_slice(&[1, 2]);
    let err = decoder.decode("IDS", &bytes, &Record::new()).unwrap_err();
    match err {
        CmlError::DecodeFailed { source, .. } => {
            assert!(matches!(*source, CmlError::ArrayTrailingBytes { remaining: 2, .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_empty_trailing_array() {
    let decoder = BinaryDecoder::new(registry());
    let mut bytes = vec![0u8; HEADER_LEN];
    bytes.extend_from_slice(&0u16.to_le_bytes());
    let decoded = decoder.decode("IDS", &bytes, &Record::new()).unwrap();
    assert_eq!(decoded["ids"], json!([]));
}

#[test]
fn test_self_referencing_schema_hits_depth_limit() {
    let looped = Schema::new(
        "LOOP",
        vec![FieldDefinition::new("next", FieldType::Object).nested("LOOP")],
    );
    let decoder = BinaryDecoder::new(Arc::new(SchemaRegistry::from_schemas([looped])));
    let err = decoder.decode("LOOP", &[0u8; HEADER_LEN], &Record::new()).unwrap_err();
    match err {
        CmlError::DecodeFailed { source, .. } => assert!(matches!(*source, CmlError::NestingTooDeep(_))),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_missing_nested_schema_is_a_schema_error() {
    let orphan = Schema::new(
        "ORPHAN",
        vec![FieldDefinition::new("o", FieldType::Object).nested("GONE")],
    );
    let decoder = BinaryDecoder::new(Arc::new(SchemaRegistry::from_schemas([orphan])));
    let err = decoder.decode("ORPHAN", &[0u8; HEADER_LEN + 4], &Record::new()).unwrap_err();
    assert!(matches!(err, CmlError::InvalidSchema(_)));
}

// Batch decode
fn raw_batch(n: usize) -> Vec<RawMessage> {
    let catalog = registry();
    let encoder = RecordEncoder::new(catalog);
    (0..n)
        .map(|i| {
            let mut record = agent_record();
            record.insert("agentId".into(), json!(i));
            let payload = encoder.encode("ADD__AGENT", HEADER, &record).unwrap();
            RawMessage::new(i as f64, "add", Some("Agent"), payload)
        })
        .collect()
}

#[test]
fn test_message_type_derivation() {
    assert_eq!(message_type_for(Some("add"), Some("Agent")), "ADD__AGENT");
    assert_eq!(message_type_for(Some("Delete"), None), "DELETE");
    assert_eq!(message_type_for(Some("Delete"), Some("")), "DELETE");
    assert_eq!(message_type_for(None, None), "");
}

#[test]
fn test_parallel_batch_preserves_order() {
    let messages = raw_batch(103);
    let config = DecodeConfig { parallelism: 4, chunk_size: 10 };
    let decoder = BinaryDecoder::new(registry());
    let results = decode_batch(&decoder, &messages, &config);
    assert_eq!(results.len(), 103);
    for (i, result) in results.iter().enumerate() {
        let record = result.as_ref().unwrap();
        assert_eq!(record["agentId"], json!(i));
        assert_eq!(record["_dbMetadata"]["recoveryKey"], json!(i));
        assert_eq!(record["_dbMetadata"]["tableName"], json!("Agent"));
    }
}

#[test]
fn test_lossy_batch_counts_failures() {
    let mut messages = raw_batch(5);
    messages[2].payload.truncate(HEADER_LEN + 3);
    messages.push(RawMessage::new(99.0, "noop", None, vec![0u8; HEADER_LEN]));
    let decoder = BinaryDecoder::new(registry());
    let (records, summary) = decode_batch_lossy(&decoder, &messages, &DecodeConfig::default());
    assert_eq!(records.len(), 5);
    assert_eq!(summary, DecodeSummary { total: 6, decoded: 5, failed: 1, unknown_type: 1 });
    assert_eq!(records[4]["_messageType"], json!("NOOP"));
}

#[test]
fn test_select_page_clamps() {
    let items: Vec<u32> = (0..25).collect();
    assert_eq!(select_page(&items, 1, 10), &items[0..10]);
    assert_eq!(select_page(&items, 3, 10), &items[20..25]);
    assert_eq!(select_page(&items, 9, 10), &items[20..25]);
    assert_eq!(select_page(&items, 0, 10), &items[0..10]);
    assert!(select_page::<u32>(&[], 1, 10).is_empty());
}

#[test]
fn test_select_page_zero_size_means_single_items() {
    let items: Vec<u32> = (0..25).collect();
    assert_eq!(select_page(&items, 1, 0), &items[0..1]);
    assert_eq!(select_page(&items, 7, 0), &items[6..7]);
    assert_eq!(select_page(&items, 30, 0), &items[24..25]);
    assert_eq!(select_page(&items, 0, 0), &items[0..1]);
    assert!(select_page::<u32>(&[], 0, 0).is_empty());
}

#[test]
fn test_select_page_last_partial_page() {
    let items: Vec<u32> = (0..25).collect();
    assert_eq!(select_page(&items, usize::MAX, 10), &items[20..25]);
    assert_eq!(select_page(&items, 2, 25), &items[0..25]);
    assert_eq!(select_page(&items, 1, 100), &items[..]);
}
