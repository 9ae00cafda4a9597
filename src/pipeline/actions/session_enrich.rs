//! Floor-join enrichment against the occurrence indexes built by
//! `header_extract`.

use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::expr::eval::{evaluate, ItemScope};
use crate::expr::{parse, Expr};
use crate::pipeline::action::{ActionContext, ActionSpec, ItemAction, StepAction};
use crate::pipeline::occurrence::SequenceKey;
use crate::types::record::{as_f64, id_key, recovery_key, FIELD_TRANSACTION_ID};
use crate::types::Record;

pub const ID: &str = "session_enrich";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    #[default]
    Integer,
    String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnrichParams {
    pub prefix: String,
    pub id_expression: String,
    #[serde(default)]
    pub id_type: IdType,
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub field_mappings: HashMap<String, String>,
}

#[derive(Debug)]
pub struct SessionEnrich {
    prefix: String,
    id_expr: Expr,
    id_type: IdType,
    include: HashSet<String>,
    mappings: HashMap<String, String>,
}

impl SessionEnrich {
    pub fn new(params: SessionEnrichParams) -> Result<Self, CmlError> {
        if params.prefix.trim().is_empty() {
            return Err(CmlError::InvalidConfig("'prefix' must not be blank".into()));
        }
        if params.id_expression.trim().is_empty() {
            return Err(CmlError::InvalidConfig("'idExpression' must not be blank".into()));
        }
        Ok(Self {
            prefix: params.prefix,
            id_expr: parse(&params.id_expression)?,
            id_type: params.id_type,
            include: params.include_fields.into_iter().collect(),
            mappings: params.field_mappings,
        })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let action = Self::new(spec.params()?).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::item(action))
    }

    /// The id as it appears in occurrence keys and transaction ids.
    fn id_text(&self, value: &Value) -> Result<String, CmlError> {
        match self.id_type {
            IdType::String => id_key(value)
                .ok_or_else(|| CmlError::Expression(format!("id {value} is not a scalar"))),
            IdType::Integer => as_f64(value)
                .filter(|f| f.is_finite())
                .map(|f| (f.trunc() as i64).to_string())
                .ok_or_else(|| CmlError::Expression(format!("id {value} is not numeric"))),
        }
    }

    fn enrich(&self, item: &mut Record, ctx: &ActionContext<'_>) -> Result<(), CmlError> {
        let session_key = ctx.session.key();
        let id_value = evaluate(&self.id_expr, &ItemScope(item))?.into_value();
        if id_value.is_null() {
            debug!("[{session_key}] Enrichment id missing, item passed through");
            return Ok(());
        }
        let id = self.id_text(&id_value)?;
        let key = format!("{}{}", self.prefix, id);
        let target = SequenceKey::new(recovery_key(item).unwrap_or(0.0));

        let Some(Some((owner, info))) = ctx
            .session
            .with_occurrences(&key, |index| index.floor(target).map(|(k, info)| (k, info.clone())))
        else {
            debug!("[{session_key}] No occurrences for '{key}', item passed through");
            return Ok(());
        };

        item.insert(
            FIELD_TRANSACTION_ID.to_string(),
            Value::String(format!("{id}_{owner}")),
        );
        for (name, value) in info {
            if !self.include.is_empty() && !self.include.contains(&name) {
                continue;
            }
            let target_name = self.mappings.get(&name).cloned().unwrap_or(name);
            item.insert(target_name, value);
        }
        Ok(())
    }
}

impl ItemAction for SessionEnrich {
    fn apply(&self, mut item: Record, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        if let Err(e) = self.enrich(&mut item, ctx) {
            warn!("[{}] Enrichment skipped: {e}", ctx.session.key());
        }
        Ok(vec![item])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{GlobalContext, SessionContext};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn session_with_occurrences() -> SessionContext {
        let session = SessionContext::with_key("S");
        for (rk, user) in [(10.0, "ann"), (25.0, "bob"), (40.0, "cy")] {
            session.record_occurrence(
                "cml_7",
                SequenceKey::new(rk),
                record(json!({"cmlId": 7, "user": user, "machine": "pc", "_recoveryKey": rk})),
            );
        }
        session
    }

    fn enricher(extra: Value) -> SessionEnrich {
        let mut params = json!({"prefix": "cml_", "idExpression": "_header[1]"});
        if let (Some(p), Some(e)) = (params.as_object_mut(), extra.as_object()) {
            p.extend(e.clone());
        }
        SessionEnrich::new(serde_json::from_value(params).unwrap()).unwrap()
    }

    fn enrich_one(action: &SessionEnrich, session: &SessionContext, item: Record) -> Record {
        let global = GlobalContext::new();
        let ctx = ActionContext { step: "enrich", global: &global, session };
        let mut out = action.apply(item, &ctx).unwrap();
        assert_eq!(out.len(), 1);
        out.remove(0)
    }

    #[test]
    fn test_floor_join_stamps_transaction_and_copies_fields() {
        let session = session_with_occurrences();
        let action = enricher(json!({"includeFields": ["user"], "fieldMappings": {"user": "agentUser"}}));

        let item = record(json!({"_header": [0, 7], "_dbMetadata": {"recoveryKey": 30}}));
        let out = enrich_one(&action, &session, item);
        assert_eq!(out[FIELD_TRANSACTION_ID], "7_25");
        assert_eq!(out["agentUser"], "bob");
        assert!(out.get("machine").is_none());
        assert!(out.get("user").is_none());

        let early = record(json!({"_header": [0, 7], "_dbMetadata": {"recoveryKey": 5}}));
        let out = enrich_one(&action, &session, early);
        assert_eq!(out[FIELD_TRANSACTION_ID], "7_10");
        assert_eq!(out["agentUser"], "ann");
    }

    #[test]
    fn test_all_fields_copied_without_include_list() {
        let session = session_with_occurrences();
        let item = record(json!({"_header": [0, "7"], "_dbMetadata": {"recoveryKey": 41}}));
        let out = enrich_one(&enricher(json!({})), &session, item);
        assert_eq!(out[FIELD_TRANSACTION_ID], "7_40");
        assert_eq!(out["user"], "cy");
        assert_eq!(out["cmlId"], 7);
        assert_eq!(out["_recoveryKey"], 40.0);
    }

    #[test]
    fn test_soft_failures_pass_items_through() {
        let session = session_with_occurrences();
        let action = enricher(json!({}));

        for item in [
            record(json!({"_header": [0, 8]})),
            record(json!({"_header": [0]})),
            record(json!({"_header": [0, "abc"]})),
            record(json!({"other": true})),
        ] {
            let out = enrich_one(&action, &session, item.clone());
            assert_eq!(out, item);
        }
    }

    #[test]
    fn test_required_params() {
        let missing: Result<SessionEnrichParams, _> = serde_json::from_value(json!({"prefix": "cml_"}));
        assert!(missing.is_err());
        let blank = SessionEnrichParams {
            prefix: " ".into(),
            id_expression: "x".into(),
            id_type: IdType::Integer,
            include_fields: vec![],
            field_mappings: HashMap::new(),
        };
        assert!(SessionEnrich::new(blank).is_err());
    }

    #[test]
    fn test_string_ids() {
        let session = SessionContext::with_key("S");
        session.record_occurrence("agent_A1", SequenceKey::new(1.0), record(json!({"team": "blue"})));
        let action = enricher(json!({"prefix": "agent_", "idExpression": "agentId", "idType": "string"}));
        let out = enrich_one(&action, &session, record(json!({"agentId": "A1"})));
        assert_eq!(out[FIELD_TRANSACTION_ID], "A1_1");
        assert_eq!(out["team"], "blue");
    }
}
