//! Correlation-id occurrence extraction.
//!
//! Scans the batch once per session, and for every item passing the filter
//! records `{cmlId, <fields>, _recoveryKey}` in the occurrence index of
//! `<keyPrefix><cmlId>`, keyed by the item's recovery key. Items are never
//! modified or dropped.

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::expr::eval::truthy;
use crate::expr::Condition;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, StepAction};
use crate::pipeline::occurrence::SequenceKey;
use crate::pipeline::report::{box_table, plain, Align, Column};
use crate::types::record::{float_value, recovery_key, value_to_text, FIELD_HEADER};
use crate::types::Record;

pub const ID: &str = "header_extract";
const GUARD: &str = "header_extract.executed";

pub const INFO_CML_ID: &str = "cmlId";
pub const INFO_RECOVERY_KEY: &str = "_recoveryKey";

//==================================================================================
// 1. Params
//==================================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderExtractParams {
    #[serde(default = "default_header_key")]
    pub header_key: String,
    #[serde(default)]
    pub cml_id: CmlIdParams,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub fields: Vec<HeaderFieldParams>,
    #[serde(default)]
    pub filter_condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmlIdParams {
    #[serde(default = "default_lookup_index")]
    pub lookup_index: usize,
}

impl Default for CmlIdParams {
    fn default() -> Self {
        Self {
            lookup_index: default_lookup_index(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderFieldParams {
    #[serde(default)]
    pub lookup_key: String,
    #[serde(default)]
    pub target_key: String,
    #[serde(default = "default_field_type", rename = "type")]
    pub field_type: String,
}

fn default_header_key() -> String {
    FIELD_HEADER.to_string()
}

fn default_key_prefix() -> String {
    "cml_".to_string()
}

fn default_lookup_index() -> usize {
    1
}

fn default_field_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    Integer,
    Long,
    Boolean,
}

#[derive(Debug, Clone)]
struct HeaderField {
    lookup_key: String,
    target_key: String,
    kind: FieldKind,
}

impl FieldKind {
    /// `None` leaves the target key out of the occurrence info.
    fn convert(self, value: Option<&Value>) -> Option<Value> {
        match self {
            FieldKind::Text => match value? {
                Value::Null => None,
                other => Some(Value::String(value_to_text(other))),
            },
            FieldKind::Integer => value?
                .as_i64()
                .filter(|n| i32::try_from(*n).is_ok())
                .map(Value::from),
            FieldKind::Long => value?.as_i64().map(Value::from),
            FieldKind::Boolean => Some(Value::Bool(value.is_some_and(truthy))),
        }
    }
}

//==================================================================================
// 2. Action
//==================================================================================

#[derive(Debug)]
pub struct HeaderExtractor {
    header_key: String,
    id_index: usize,
    key_prefix: String,
    fields: Vec<HeaderField>,
    filter: Option<Condition>,
}

impl HeaderExtractor {
    pub fn new(params: HeaderExtractParams) -> Result<Self, CmlError> {
        let fields = params
            .fields
            .into_iter()
            .filter_map(|f| {
                if f.lookup_key.trim().is_empty() || f.target_key.trim().is_empty() {
                    warn!("Header field without lookupKey/targetKey skipped");
                    return None;
                }
                let kind = match f.field_type.to_ascii_lowercase().as_str() {
                    "string" => FieldKind::Text,
                    "integer" | "int" => FieldKind::Integer,
                    "long" => FieldKind::Long,
                    "boolean" => FieldKind::Boolean,
                    other => {
                        warn!("Unsupported header field type '{other}', reading as string");
                        FieldKind::Text
                    }
                };
                Some(HeaderField {
                    lookup_key: f.lookup_key,
                    target_key: f.target_key,
                    kind,
                })
            })
            .collect();

        let filter = match params.filter_condition.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(Condition::parse(text)?),
            _ => None,
        };

        Ok(Self {
            header_key: params.header_key,
            id_index: params.cml_id.lookup_index,
            key_prefix: params.key_prefix,
            fields,
            filter,
        })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let action = Self::new(spec.params()?).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::batch(action))
    }

    fn passes_filter(&self, item: &Record, session_key: &str) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        filter.matches(item).unwrap_or_else(|e| {
            warn!("[{session_key}] Filter '{}' failed: {e}", filter.source());
            false
        })
    }

    fn extract(&self, item: &Record, ctx: &ActionContext<'_>) -> bool {
        let session_key = ctx.session.key();
        let header = match item.get(&self.header_key) {
            Some(Value::Array(header)) if header.len() >= 2 => header,
            _ => {
                warn!("[{session_key}] Missing or too short '{}' header, item skipped", self.header_key);
                return false;
            }
        };
        let Some(cml_id) = header.get(self.id_index).and_then(Value::as_i64) else {
            warn!(
                "[{session_key}] No integer id at header index {}, item skipped",
                self.id_index
            );
            return false;
        };

        let mut info = Record::new();
        info.insert(INFO_CML_ID.to_string(), Value::from(cml_id));
        for field in &self.fields {
            if let Some(value) = field.kind.convert(item.get(&field.lookup_key)) {
                info.insert(field.target_key.clone(), value);
            }
        }
        let sequence = recovery_key(item).unwrap_or(0.0);
        info.insert(INFO_RECOVERY_KEY.to_string(), float_value(sequence));

        let key = format!("{}{}", self.key_prefix, cml_id);
        ctx.session.record_occurrence(&key, SequenceKey::new(sequence), info);
        debug!("[{session_key}] Stored occurrence of '{key}' at recoveryKey={sequence}");
        true
    }

    /// Logs every id with two or more occurrences in this session.
    fn report_recycling(&self, ctx: &ActionContext<'_>) {
        let session_key = ctx.session.key();
        let mut rows = Vec::new();
        let mut recycled = 0;

        for key in ctx.session.occurrence_keys() {
            if !key.starts_with(&self.key_prefix) {
                continue;
            }
            let Some(lines) = ctx.session.with_occurrences(&key, |index| {
                if index.len() < 2 {
                    return Vec::new();
                }
                let mut lines = vec![format!("{} occurrences:", index.len())];
                lines.extend(index.iter().map(|(rk, info)| {
                    let text = |field: &str| {
                        info.get(field)
                            .filter(|v| !v.is_null())
                            .map(value_to_text)
                            .unwrap_or_else(|| "?".to_string())
                    };
                    format!("rk={:<12} {} @ {}", rk.to_string(), text("userName"), text("machineName"))
                }));
                lines
            }) else {
                continue;
            };
            if lines.is_empty() {
                continue;
            }

            recycled += 1;
            for (i, line) in lines.into_iter().enumerate() {
                let (n, name) = if i == 0 {
                    (recycled.to_string(), key.clone())
                } else {
                    (String::new(), String::new())
                };
                rows.push(vec![n, name, line]);
            }
        }

        if recycled == 0 {
            info!("[{session_key}] CML id recycling report: no recycled ids in this session");
            return;
        }

        let columns = [
            Column::new("#", 3, Align::Right),
            Column::new("CML key", 12, Align::Left),
            Column::new("Occurrences (recoveryKey → userName @ machineName)", 56, Align::Left),
        ];
        warn!(
            "[{session_key}] CML id recycling report: {recycled} id(s) recycled\n{}",
            box_table(&columns, &rows, &plain)
        );
    }
}

impl BatchAction for HeaderExtractor {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        let session_key = ctx.session.key();
        if !ctx.session.run_once(GUARD) {
            debug!("[{session_key}] Header extraction already ran in this session, skipping");
            return Ok(batch);
        }
        if self.filter.is_none() {
            warn!("[{session_key}] No 'filterCondition' configured, extracting from all items");
        }

        let mut matched = 0usize;
        let mut stored = 0usize;
        for item in &batch {
            if !self.passes_filter(item, session_key) {
                continue;
            }
            matched += 1;
            if self.extract(item, ctx) {
                stored += 1;
            }
        }
        info!(
            "[{session_key}] Header extraction: {} items, {matched} matched, {stored} occurrences stored",
            batch.len()
        );

        self.report_recycling(ctx);
        Ok(batch)
    }
}
