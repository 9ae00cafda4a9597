//! Multi-key stable sort, run once per session.

use std::cmp::Ordering;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, StepAction};
use crate::types::record::{get_path, value_to_text};
use crate::types::Record;

pub const ID: &str = "sort";
const GUARD: &str = "sort.executed";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKeyParams {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub nulls_first: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortParams {
    #[serde(default)]
    pub sort_keys: Vec<SortKeyParams>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    /// Missing and null values are placed by `nulls_first` regardless of direction.
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let va = get_path(a, &self.field).filter(|v| !v.is_null());
        let vb = get_path(b, &self.field).filter(|v| !v.is_null());
        match (va, vb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if self.nulls_first => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) if self.nulls_first => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                if self.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            }
        }
    }
}

/// Integers compare exactly, other numbers as floats, booleans as booleans,
/// everything else by text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let (fx, fy) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                fx.total_cmp(&fy)
            }
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => value_to_text(a).cmp(&value_to_text(b)),
    }
}

#[derive(Debug)]
pub struct Sort {
    keys: Vec<SortKey>,
}

impl Sort {
    pub fn new(params: SortParams) -> Self {
        let keys = params
            .sort_keys
            .into_iter()
            .filter_map(|k| {
                let field = k.field.trim();
                if field.is_empty() {
                    warn!("Sort key without 'field' skipped");
                    return None;
                }
                let direction = k.direction.unwrap_or_default();
                Some(SortKey {
                    field: field.to_string(),
                    ascending: !direction.trim().eq_ignore_ascii_case("desc"),
                    nulls_first: k.nulls_first,
                })
            })
            .collect();
        Self { keys }
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        Ok(StepAction::batch(Self::new(spec.params()?)))
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn sort(&self, items: &mut [Record]) {
        items.sort_by(|a, b| {
            self.keys
                .iter()
                .map(|key| key.compare(a, b))
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }
}

impl BatchAction for Sort {
    fn apply(&self, mut batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        let session_key = ctx.session.key();
        if !ctx.session.run_once(GUARD) {
            debug!("[{session_key}] Sort already ran in this session, items re-emitted as-is");
            return Ok(batch);
        }
        if self.keys.is_empty() {
            warn!("[{session_key}] No valid sort keys configured, items passed through");
            return Ok(batch);
        }

        self.sort(&mut batch);
        info!("[{session_key}] Sorted {} items by {} key(s)", batch.len(), self.keys.len());
        Ok(batch)
    }
}
