//! Drops whole transactions when any member item matches a `field==value` rule.
//!
//! Needs the whole batch, so it runs as a batch action: the first pass flags
//! transaction ids, the second removes every item carrying a flagged id.

use hashbrown::HashSet;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, StepAction};
use crate::types::record::{value_to_text, FIELD_TRANSACTION_ID};
use crate::types::Record;

pub const ID: &str = "transaction_filter";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilterParams {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// `field==value`, matched case-insensitively against the field's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEquals {
    pub field: String,
    pub value: String,
}

impl FieldEquals {
    pub fn parse(text: &str) -> Option<Self> {
        let (field, value) = text.split_once("==")?;
        let (field, value) = (field.trim(), value.trim());
        if field.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self {
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    pub fn matches(&self, item: &Record) -> bool {
        let text = item.get(&self.field).map(value_to_text).unwrap_or_default();
        text.to_lowercase() == self.value.to_lowercase()
    }
}

#[derive(Debug)]
pub struct TransactionFilter {
    rules: Vec<FieldEquals>,
}

impl TransactionFilter {
    pub fn new(params: TransactionFilterParams) -> Self {
        let rules = params
            .condition
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .chain(params.conditions)
            .filter_map(|text| {
                let parsed = FieldEquals::parse(&text);
                if parsed.is_none() {
                    warn!("Skipping malformed transaction filter rule '{text}' (expected 'field==value')");
                }
                parsed
            })
            .collect();
        Self { rules }
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        Ok(StepAction::batch(Self::new(spec.params()?)))
    }

    pub fn rules(&self) -> &[FieldEquals] {
        &self.rules
    }
}

fn transaction_id(item: &Record) -> Option<String> {
    match item.get(FIELD_TRANSACTION_ID)? {
        Value::Null => None,
        other => Some(value_to_text(other)),
    }
}

impl BatchAction for TransactionFilter {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        let session_key = ctx.session.key();
        if self.rules.is_empty() {
            warn!("[{session_key}] No valid transaction filter rules, all items kept");
            return Ok(batch);
        }

        let mut flagged: HashSet<String> = HashSet::new();
        for item in &batch {
            let Some(tx) = transaction_id(item) else {
                continue;
            };
            if flagged.contains(&tx) {
                continue;
            }
            if let Some(rule) = self.rules.iter().find(|rule| rule.matches(item)) {
                debug!(
                    "[{session_key}] Transaction '{tx}' flagged: {} == {}",
                    rule.field, rule.value
                );
                flagged.insert(tx);
            }
        }

        if flagged.is_empty() {
            debug!("[{session_key}] No transactions matched the filter rules");
            return Ok(batch);
        }

        let before = batch.len();
        let kept: Vec<Record> = batch
            .into_iter()
            .filter(|item| transaction_id(item).map_or(true, |tx| !flagged.contains(&tx)))
            .collect();

        let mut ids: Vec<&String> = flagged.iter().collect();
        ids.sort();
        info!(
            "[{session_key}] Filtered {} transaction(s) {ids:?}, removed {}/{before} items",
            flagged.len(),
            before - kept.len()
        );
        Ok(kept)
    }
}
