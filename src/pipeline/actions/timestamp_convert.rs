//! FILETIME tick counts to Unix milliseconds plus zone-aware RFC 3339 text.

use chrono::DateTime;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, ItemAction, StepAction};
use crate::utils::{filetime_to_unix_millis, ReportZone};
use crate::types::Record;

pub const ID: &str = "timestamp_convert";

fn default_unix_field() -> String {
    "unixTimestamp".to_string()
}

fn default_human_field() -> String {
    "humanReadableTimestamp".to_string()
}

fn default_input_fields() -> Vec<String> {
    vec!["DateTimeStamp".to_string(), "dateTimeStamp".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampConvertParams {
    /// IANA name or fixed offset; falls back to the registry's default when absent.
    #[serde(default)]
    pub zone_id_for_human_readable_timestamp: Option<String>,
    #[serde(default = "default_unix_field")]
    pub unix_timestamp_field_name: String,
    #[serde(default = "default_human_field")]
    pub human_readable_timestamp_field_name: String,
    #[serde(default = "default_input_fields")]
    pub input_field_names: Vec<String>,
}

#[derive(Debug)]
pub struct TimestampConvert {
    zone: ReportZone,
    unix_field: String,
    human_field: String,
    inputs: Vec<String>,
}

impl TimestampConvert {
    pub fn new(params: TimestampConvertParams) -> Result<Self, CmlError> {
        let inputs: Vec<String> = params
            .input_field_names
            .into_iter()
            .filter(|f| !f.trim().is_empty())
            .collect();
        Ok(Self {
            zone: ReportZone::parse(
                params.zone_id_for_human_readable_timestamp.as_deref().unwrap_or("UTC"),
            )?,
            unix_field: params.unix_timestamp_field_name,
            human_field: params.human_readable_timestamp_field_name,
            inputs: if inputs.is_empty() { default_input_fields() } else { inputs },
        })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let mut params: TimestampConvertParams = spec.params()?;
        params
            .zone_id_for_human_readable_timestamp
            .get_or_insert_with(|| spec.default_utc_offset.to_string());
        let action = Self::new(params).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::item(action))
    }

    /// Unix millis and the formatted timestamp for a tick count.
    pub fn convert(&self, ticks: i64) -> Option<(i64, String)> {
        let millis = filetime_to_unix_millis(ticks);
        let at = DateTime::from_timestamp_millis(millis)?;
        Some((millis, self.zone.format(at)))
    }
}

fn ticks(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ItemAction for TimestampConvert {
    fn apply(&self, mut item: Record, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        let Some(field) = self.inputs.iter().find(|f| item.contains_key(f.as_str())) else {
            debug!("[{}] No timestamp field on item, passed through", ctx.session.key());
            return Ok(vec![item]);
        };

        match item.get(field).and_then(ticks).and_then(|t| self.convert(t)) {
            Some((millis, text)) => {
                item.insert(self.unix_field.clone(), Value::from(millis));
                item.insert(self.human_field.clone(), Value::String(text));
            }
            None => warn!(
                "[{}] Field '{field}' is not a convertible tick count, item passed through",
                ctx.session.key()
            ),
        }
        Ok(vec![item])
    }
}
