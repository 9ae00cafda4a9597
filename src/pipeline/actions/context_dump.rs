//! Diagnostic dump of the global and session contexts, once per label per session.

use log::{debug, info};
use serde::Deserialize;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, StepAction};
use crate::pipeline::report::{box_table, plain, Align, Column};
use crate::types::record::value_to_text;
use crate::types::Record;

pub const ID: &str = "context_dump";

fn default_label() -> String {
    "CONTEXT DUMP".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDumpParams {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_true")]
    pub dump_global: bool,
    #[serde(default = "default_true")]
    pub dump_session: bool,
    #[serde(default)]
    pub keys_only: bool,
}

#[derive(Debug)]
pub struct ContextDump {
    params: ContextDumpParams,
    guard: String,
}

const COLUMNS: [Column; 3] = [
    Column::new("Scope", 7, Align::Left),
    Column::new("Key", 30, Align::Left),
    Column::new("Value", 60, Align::Left),
];

impl ContextDump {
    pub fn new(params: ContextDumpParams) -> Self {
        let normalised = params
            .label
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_uppercase();
        Self {
            guard: format!("context_dump.{normalised}"),
            params,
        }
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        Ok(StepAction::batch(Self::new(spec.params()?)))
    }

    fn value_cell(&self, text: String) -> String {
        if self.params.keys_only {
            String::new()
        } else {
            text
        }
    }

    pub fn render(&self, ctx: &ActionContext<'_>) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let push_values = |scope: &str, values: Record, rows: &mut Vec<Vec<String>>| {
            for (key, value) in values {
                rows.push(vec![scope.to_string(), key, self.value_cell(value_to_text(&value))]);
            }
        };

        if self.params.dump_global {
            push_values("global", ctx.global.snapshot(), &mut rows);
        }
        if self.params.dump_session {
            push_values("session", ctx.session.values_snapshot(), &mut rows);
            for (key, count) in ctx.session.entity_keys() {
                rows.push(vec!["session".into(), key, self.value_cell(format!("<{count} entities>"))]);
            }
            for key in ctx.session.occurrence_keys() {
                let count = ctx.session.with_occurrences(&key, |i| i.len()).unwrap_or(0);
                rows.push(vec!["session".into(), key, self.value_cell(format!("<{count} occurrences>"))]);
            }
        }

        format!(
            "{} [{}]\n{}",
            self.params.label,
            ctx.session.key(),
            box_table(&COLUMNS, &rows, &plain)
        )
    }
}

impl BatchAction for ContextDump {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        if !ctx.session.run_once(&self.guard) {
            debug!(
                "[{}] Context dump '{}' already ran in this session",
                ctx.session.key(),
                self.params.label
            );
            return Ok(batch);
        }
        info!("{}", self.render(ctx));
        Ok(batch)
    }
}
