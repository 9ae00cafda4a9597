//! Field synthesis from `{{ }}` templates, one item at a time.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::CmlError;
use crate::expr::{EnvelopeScope, Template};
use crate::pipeline::action::{ActionContext, ActionSpec, ItemAction, StepAction};
use crate::pipeline::context::EntityView;
use crate::types::Record;

pub const ID: &str = "template";

//==================================================================================
// 1. Template Sets
//==================================================================================

/// Target field → compiled template, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    entries: Vec<(String, Template)>,
}

impl TemplateSet {
    pub fn from_map(templates: &Map<String, Value>) -> Result<Self, CmlError> {
        let entries = templates
            .iter()
            .map(|(field, source)| match source {
                Value::String(text) => Ok((field.clone(), Template::compile(text))),
                other => Err(CmlError::InvalidConfig(format!(
                    "template for '{field}' must be a string, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    pub fn needs_evaluator(&self) -> bool {
        self.entries.iter().any(|(_, t)| t.needs_evaluator())
    }

    pub fn entity_maps(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().flat_map(|(_, t)| t.entity_maps())
    }
}

/// Everything a render pass reads besides the item itself, captured once.
pub(crate) struct RenderEnv {
    session: Record,
    global: Record,
    entities: EntityView,
}

impl RenderEnv {
    /// Snapshots are only taken when some template needs the general evaluator.
    pub(crate) fn prepare<'a>(
        ctx: &ActionContext<'_>,
        sets: impl IntoIterator<Item = &'a TemplateSet>,
    ) -> Self {
        let mut maps = BTreeSet::new();
        let mut needs_evaluator = false;
        for set in sets {
            maps.extend(set.entity_maps().map(str::to_string));
            needs_evaluator |= set.needs_evaluator();
        }

        let (session, global) = if needs_evaluator {
            (ctx.session.scalar_snapshot(), ctx.global.snapshot())
        } else {
            (Record::new(), Record::new())
        };
        Self {
            session,
            global,
            entities: ctx.session.entity_view(maps),
        }
    }

    /// A copy of `item` with every templated field written. Templates read the
    /// original item, never fields written earlier in the same pass.
    pub(crate) fn render(&self, set: &TemplateSet, item: &Record) -> Record {
        let scope = EnvelopeScope {
            item,
            session: &self.session,
            global: &self.global,
        };
        let mut out = item.clone();
        for (field, template) in &set.entries {
            out.insert(field.clone(), Value::String(template.render(&scope, &self.entities)));
        }
        out
    }
}

//==================================================================================
// 2. Item Action
//==================================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateParams {
    pub templates: Map<String, Value>,
}

#[derive(Debug)]
pub struct TemplateAction {
    templates: TemplateSet,
}

impl TemplateAction {
    pub fn new(params: TemplateParams) -> Result<Self, CmlError> {
        Ok(Self {
            templates: TemplateSet::from_map(&params.templates)?,
        })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let action = Self::new(spec.params()?).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::item(action))
    }
}

impl ItemAction for TemplateAction {
    fn apply(&self, item: Record, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        if self.templates.is_empty() {
            return Ok(vec![item]);
        }
        let env = RenderEnv::prepare(ctx, [&self.templates]);
        Ok(vec![env.render(&self.templates, &item)])
    }

    /// Snapshots the session, global and entity state once for the whole run.
    fn prepare<'a>(&'a self, ctx: &ActionContext<'_>) -> Option<Box<dyn ItemAction + 'a>> {
        if self.templates.is_empty() {
            return None;
        }
        Some(Box::new(PreparedTemplates {
            templates: &self.templates,
            env: RenderEnv::prepare(ctx, [&self.templates]),
        }))
    }
}

/// A template step bound to the state captured at the start of a run.
struct PreparedTemplates<'a> {
    templates: &'a TemplateSet,
    env: RenderEnv,
}

impl ItemAction for PreparedTemplates<'_> {
    fn apply(&self, item: Record, _ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        Ok(vec![self.env.render(self.templates, &item)])
    }
}
