//! Rule-based field synthesis over the whole batch.
//!
//! Rules are tried in order and the first whose condition matches an item
//! renders its templates into a copy of that item. Unmatched items pass
//! through. Everything that does not depend on the item (entity indexes,
//! context snapshots) is captured once per batch.

use hashbrown::HashMap;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::CmlError;
use crate::expr::Condition;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, StepAction};
use crate::pipeline::actions::template::{RenderEnv, TemplateSet};
use crate::types::record::{value_to_text, FIELD_MESSAGE_TYPE};
use crate::types::Record;

pub const ID: &str = "batch_template";

fn default_condition() -> String {
    "true".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleParams {
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub templates: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchTemplateParams {
    #[serde(default)]
    pub rules: Vec<RuleParams>,
}

#[derive(Debug)]
struct Rule {
    condition: Condition,
    templates: TemplateSet,
}

#[derive(Debug)]
pub struct BatchTemplate {
    rules: Vec<Rule>,
    /// Rule choice depends only on `_messageType`, so it can be memoised per type.
    cache_by_type: bool,
}

impl BatchTemplate {
    pub fn new(params: BatchTemplateParams) -> Result<Self, CmlError> {
        let mut rules = Vec::with_capacity(params.rules.len());
        for rule in params.rules {
            let Some(templates) = rule.templates else {
                warn!("Rule '{}' has no 'templates' object, skipped", rule.condition);
                continue;
            };
            rules.push(Rule {
                condition: Condition::parse(&rule.condition)?,
                templates: TemplateSet::from_map(&templates)?,
            });
        }
        if rules.is_empty() {
            warn!("No template rules configured, items will pass through");
        }
        let cache_by_type = rules
            .iter()
            .all(|r| r.condition.depends_only_on(FIELD_MESSAGE_TYPE));
        Ok(Self { rules, cache_by_type })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let action = Self::new(spec.params()?).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::batch(action))
    }

    pub fn caches_by_type(&self) -> bool {
        self.cache_by_type
    }

    fn match_rule(&self, item: &Record, session_key: &str) -> Option<usize> {
        self.rules.iter().position(|rule| {
            rule.condition.matches(item).unwrap_or_else(|e| {
                debug!(
                    "[{session_key}] Rule condition '{}' failed, treated as false: {e}",
                    rule.condition.source()
                );
                false
            })
        })
    }
}

impl BatchAction for BatchTemplate {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        if self.rules.is_empty() {
            return Ok(batch);
        }
        let session_key = ctx.session.key();
        let env = RenderEnv::prepare(ctx, self.rules.iter().map(|r| &r.templates));
        let mut by_type: HashMap<String, Option<usize>> = HashMap::new();
        let mut rendered = 0usize;

        let out = batch
            .into_iter()
            .map(|item| {
                let rule = if self.cache_by_type {
                    let kind = item
                        .get(FIELD_MESSAGE_TYPE)
                        .map(value_to_text)
                        .unwrap_or_default();
                    *by_type
                        .entry(kind)
                        .or_insert_with(|| self.match_rule(&item, session_key))
                } else {
                    self.match_rule(&item, session_key)
                };
                match rule {
                    Some(i) => {
                        rendered += 1;
                        env.render(&self.rules[i].templates, &item)
                    }
                    None => item,
                }
            })
            .collect::<Vec<_>>();

        info!(
            "[{session_key}] Batch templates rendered for {rendered}/{} items",
            out.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{EntityStore, GlobalContext, SessionContext};
    use serde_json::json;

    fn action(rules: Value) -> BatchTemplate {
        BatchTemplate::new(serde_json::from_value(json!({ "rules": rules })).unwrap()).unwrap()
    }

    fn run(action: &BatchTemplate, session: &SessionContext, items: Vec<Value>) -> Vec<Value> {
        let global = GlobalContext::new();
        let ctx = ActionContext { step: "rules", global: &global, session };
        let batch = items.into_iter().map(|v| v.as_object().unwrap().clone()).collect();
        action
            .apply(batch, &ctx)
            .unwrap()
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = action(json!([
            {"condition": "_messageType == 'A'", "templates": {"out": "first {{item.v}}"}},
            {"condition": "_messageType in ('A', 'B')", "templates": {"out": "second {{item.v}}"}},
            {"condition": "_messageType == 'C'"}
        ]));
        assert!(rules.caches_by_type());

        let session = SessionContext::with_key("S");
        let out = run(&rules, &session, vec![
            json!({"_messageType": "A", "v": 1}),
            json!({"_messageType": "B", "v": 2}),
            json!({"_messageType": "A", "v": 3}),
            json!({"_messageType": "C", "v": 4}),
        ]);
        assert_eq!(out[0]["out"], "first 1");
        assert_eq!(out[1]["out"], "second 2");
        assert_eq!(out[2]["out"], "first 3");
        assert_eq!(out[3], json!({"_messageType": "C", "v": 4}));
    }

    #[test]
    fn test_item_dependent_conditions_are_not_cached() {
        let rules = action(json!([
            {"condition": "_messageType == 'A' && v > 1", "templates": {"big": "yes"}}
        ]));
        assert!(!rules.caches_by_type());

        let session = SessionContext::with_key("S");
        let out = run(&rules, &session, vec![
            json!({"_messageType": "A", "v": 1}),
            json!({"_messageType": "A", "v": 2}),
        ]);
        assert!(out[0].get("big").is_none());
        assert_eq!(out[1]["big"], "yes");
    }

    #[test]
    fn test_entity_lookup_through_preloaded_store() {
        let session = SessionContext::with_key("S");
        let mut teams = EntityStore::default();
        teams.by_id.insert("3".into(), json!({"name": "Blue", "lead": {"name": "Ann"}}));
        session.insert_entities_if_absent("teams", teams);

        let rules = action(json!([{
            "templates": {
                "team": "{{eval(concat('session.teams.', item.teamId)).name}}",
                "lead": "{{eval(concat('session.teams.', item.teamId)).lead.name}}"
            }
        }]));
        let out = run(&rules, &session, vec![json!({"teamId": 3}), json!({"teamId": 4})]);
        assert_eq!(out[0]["team"], "Blue");
        assert_eq!(out[0]["lead"], "Ann");
        assert_eq!(out[1]["team"], "");
    }

    #[test]
    fn test_invalid_condition_is_rejected() {
        let params: BatchTemplateParams =
            serde_json::from_value(json!({"rules": [{"condition": "a ==", "templates": {}}]})).unwrap();
        assert!(BatchTemplate::new(params).is_err());
    }
}
