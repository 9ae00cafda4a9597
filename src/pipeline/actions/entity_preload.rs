//! Loads a reference dataset into the session once, as a list plus an id index.

use std::sync::Arc;

use hashbrown::HashMap;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CmlError;
use crate::pipeline::action::{ActionContext, ActionSpec, BatchAction, EntityRepository, StepAction};
use crate::pipeline::context::EntityStore;
use crate::types::record::id_key;
use crate::types::Record;

pub const ID: &str = "entity_preload";

/// Id fields tried in order when none is configured.
pub const DEFAULT_ID_FIELDS: [&str; 6] = [
    "id",
    "skillTargetId",
    "agentTeamId",
    "precisionQueueId",
    "agentTeamID",
    "precisionQueueID",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPreloadParams {
    pub dataset: String,
    #[serde(default)]
    pub session_context_key: Option<String>,
    #[serde(default)]
    pub id_field: Option<String>,
}

/// `com.example.AgentTeam` → `agentTeam`.
pub fn default_context_key(dataset: &str) -> String {
    let simple = dataset.rsplit('.').next().unwrap_or(dataset);
    let mut chars = simple.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct EntityPreload {
    dataset: String,
    context_key: String,
    id_field: Option<String>,
    repository: Arc<dyn EntityRepository>,
}

impl EntityPreload {
    pub fn new(params: EntityPreloadParams, repository: Arc<dyn EntityRepository>) -> Result<Self, CmlError> {
        let dataset = params.dataset.trim().to_string();
        if dataset.is_empty() {
            return Err(CmlError::InvalidConfig("'dataset' must not be blank".into()));
        }
        let context_key = params
            .session_context_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| default_context_key(&dataset));

        Ok(Self {
            dataset,
            context_key,
            id_field: params.id_field.filter(|f| !f.trim().is_empty()),
            repository,
        })
    }

    pub fn factory(spec: &ActionSpec<'_>) -> Result<StepAction, CmlError> {
        let repository = spec
            .repository
            .clone()
            .ok_or_else(|| spec.invalid("no entity repository is configured"))?;
        let action = Self::new(spec.params()?, repository).map_err(|e| spec.invalid(e))?;
        Ok(StepAction::batch(action))
    }

    pub fn context_key(&self) -> &str {
        &self.context_key
    }

    fn list_key(&self) -> String {
        format!("{}List", self.context_key)
    }

    fn row_id(&self, row: &Record) -> Option<String> {
        match &self.id_field {
            Some(field) => row.get(field).and_then(id_key),
            None => DEFAULT_ID_FIELDS
                .iter()
                .find_map(|field| row.get(*field).and_then(id_key)),
        }
    }

    fn build_store(&self, rows: Vec<Record>) -> EntityStore {
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(id) = self.row_id(row) {
                by_id.insert(id, Value::Object(row.clone()));
            }
        }
        EntityStore { list: rows, by_id }
    }

    fn preload(&self, ctx: &ActionContext<'_>) -> Result<(), CmlError> {
        let session_key = ctx.session.key();
        if ctx.session.contains_key(&self.context_key) || ctx.session.contains_key(&self.list_key()) {
            debug!(
                "[{session_key}] '{}' already preloaded into '{}', skipping",
                self.dataset, self.context_key
            );
            return Ok(());
        }

        let rows = self.repository.find_all(&self.dataset)?;
        let store = self.build_store(rows);
        let (count, with_ids) = (store.list.len(), store.by_id.len());
        if ctx.session.insert_entities_if_absent(&self.context_key, store) {
            info!(
                "[{session_key}] Preloaded {count} '{}' entities ({with_ids} with ids) into '{}'",
                self.dataset, self.context_key
            );
        }
        Ok(())
    }
}

impl BatchAction for EntityPreload {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
        if let Err(e) = self.preload(ctx) {
            error!("[{}] Entity preload of '{}' failed: {e}", ctx.session.key(), self.dataset);
        }
        Ok(batch)
    }
}
