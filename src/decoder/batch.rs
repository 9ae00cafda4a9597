// In: src/decoder/batch.rs

//! Decoding many stored messages at once.
//!
//! Records are independent, so a batch is split into chunks and decoded on
//! scoped worker threads. Output order always matches input order.

use std::time::Instant;

use serde_json::Value;

use crate::config::{resolve_workers, DecodeConfig};
use crate::decoder::BinaryDecoder;
use crate::error::CmlError;
use crate::types::record::*;
use crate::types::Record;

/// One stored row: its storage metadata and the opaque binary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub recovery_key: f64,
    pub log_operation: Option<String>,
    pub table_name: Option<String>,
    /// Epoch milliseconds of the row's timestamp.
    pub date_time_millis: Option<i64>,
    pub local_date_time: Option<String>,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(recovery_key: f64, log_operation: &str, table_name: Option<&str>, payload: Vec<u8>) -> Self {
        Self {
            recovery_key,
            log_operation: Some(log_operation.to_string()),
            table_name: table_name.map(str::to_string),
            date_time_millis: None,
            local_date_time: None,
            payload,
        }
    }

    pub fn message_type(&self) -> String {
        message_type_for(self.log_operation.as_deref(), self.table_name.as_deref())
    }

    /// The metadata map echoed into `_dbMetadata`.
    pub fn metadata(&self) -> Record {
        let mut meta = Record::new();
        let key = if self.recovery_key.fract() == 0.0 && self.recovery_key.abs() < 9.0e15 {
            Value::from(self.recovery_key as i64)
        } else {
            float_value(self.recovery_key)
        };
        meta.insert(META_RECOVERY_KEY.into(), key);
        meta.insert(META_LOG_OPERATION.into(), Value::from(self.log_operation.clone()));
        meta.insert(META_TABLE_NAME.into(), Value::from(self.table_name.clone()));
        meta.insert(META_DATE_TIME.into(), Value::from(self.date_time_millis));
        if let Some(local) = &self.local_date_time {
            meta.insert(META_LOCAL_DATE_TIME.into(), Value::from(local.clone()));
        }
        meta
    }
}

/// `LOGOPERATION__TABLENAME` in upper case, or just the operation when there is no table.
pub fn message_type_for(log_operation: Option<&str>, table_name: Option<&str>) -> String {
    let operation = log_operation.unwrap_or_default().to_uppercase();
    match table_name {
        Some(table) if !table.is_empty() => format!("{}__{}", operation, table.to_uppercase()),
        _ => operation,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub total: usize,
    pub decoded: usize,
    pub failed: usize,
    /// Decoded records whose type had no schema (header and metadata only).
    pub unknown_type: usize,
}

/// Decodes every message, returning one result per input in input order.
pub fn decode_batch(
    decoder: &BinaryDecoder,
    messages: &[RawMessage],
    config: &DecodeConfig,
) -> Vec<Result<Record, CmlError>> {
    let start = Instant::now();
    let chunk_size = config.chunk_size.max(1);
    let workers = resolve_workers(config.parallelism).min(messages.len().div_ceil(chunk_size));

    let decode_one = |m: &RawMessage| decoder.decode(&m.message_type(), &m.payload, &m.metadata());

    let results: Vec<Result<Record, CmlError>> = if workers <= 1 {
        messages.iter().map(decode_one).collect()
    } else {
        let chunks: Vec<&[RawMessage]> = messages.chunks(chunk_size).collect();
        let mut slots: Vec<Vec<Result<Record, CmlError>>> = Vec::with_capacity(chunks.len());
        slots.resize_with(chunks.len(), Vec::new);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    let chunks = &chunks;
                    let decode_one = &decode_one;
                    scope.spawn(move || {
                        chunks
                            .iter()
                            .enumerate()
                            .skip(w)
                            .step_by(workers)
                            .map(|(i, chunk)| (i, chunk.iter().map(decode_one).collect::<Vec<_>>()))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(parts) => {
                        for (i, part) in parts {
                            slots[i] = part;
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
        slots.into_iter().flatten().collect()
    };

    log::info!(
        "Decoded {} messages on {} worker(s) in {:.2?}",
        messages.len(),
        workers.max(1),
        start.elapsed()
    );
    results
}

/// Decodes every message, dropping (and logging) the ones that fail.
pub fn decode_batch_lossy(
    decoder: &BinaryDecoder,
    messages: &[RawMessage],
    config: &DecodeConfig,
) -> (Vec<Record>, DecodeSummary) {
    let mut summary = DecodeSummary {
        total: messages.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(messages.len());
    for (message, result) in messages.iter().zip(decode_batch(decoder, messages, config)) {
        match result {
            Ok(record) => {
                if !record.contains_key(FIELD_SCHEMA_NAME) {
                    summary.unknown_type += 1;
                }
                summary.decoded += 1;
                records.push(record);
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!("Dropping message with recoveryKey {}: {}", message.recovery_key, e);
            }
        }
    }
    crate::log_metric!(
        "event" = "decode_batch",
        "total" = summary.total,
        "failed" = summary.failed,
        "unknown_type" = summary.unknown_type
    );
    (records, summary)
}

/// Returns page `page` (1-based, clamped to the valid range) of `page_size` items.
/// A `page_size` of 0 counts as 1.
pub fn select_page<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    if items.is_empty() {
        return items;
    }
    let page_size = page_size.max(1);
    let total_pages = items.len().div_ceil(page_size);
    let page = page.clamp(1, total_pages);
    let from = (page - 1) * page_size;
    let to = (from + page_size).min(items.len());
    &items[from..to]
}
