//! Action contracts, the step action variant and the identifier registry.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CmlError;
use crate::pipeline::actions;
use crate::pipeline::context::{GlobalContext, SessionContext};
use crate::types::Record;

//==================================================================================
// 1. Action Traits
//==================================================================================

/// What an action sees while it runs.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub step: &'a str,
    pub global: &'a GlobalContext,
    pub session: &'a SessionContext,
}

/// Receives the whole batch; the step condition is never applied to it.
pub trait BatchAction: Send + Sync {
    fn apply(&self, batch: Vec<Record>, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError>;
}

/// Receives one item at a time and may emit zero or more items for it.
///
/// An `Err` drops the item; actions that should keep items on failure handle
/// the error themselves.
pub trait ItemAction: Send + Sync {
    fn apply(&self, item: Record, ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError>;

    /// Called once per step run before the first item. A returned action
    /// handles every item of that run in place of `self`.
    fn prepare<'a>(&'a self, _ctx: &ActionContext<'_>) -> Option<Box<dyn ItemAction + 'a>> {
        None
    }
}

pub enum StepAction {
    Batch(Box<dyn BatchAction>),
    Item(Box<dyn ItemAction>),
}

impl StepAction {
    pub fn batch(action: impl BatchAction + 'static) -> Self {
        StepAction::Batch(Box::new(action))
    }

    pub fn item(action: impl ItemAction + 'static) -> Self {
        StepAction::Item(Box::new(action))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Batch(_) => "batch",
            StepAction::Item(_) => "item",
        }
    }
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepAction::{}", self.kind())
    }
}

//==================================================================================
// 2. Entity Repository
//==================================================================================

/// Source of reference datasets for preloading.
pub trait EntityRepository: Send + Sync {
    fn find_all(&self, dataset: &str) -> Result<Vec<Record>, CmlError>;
}

/// A repository over fixed in-memory datasets. Unknown datasets are errors.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    datasets: HashMap<String, Vec<Record>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, rows: Vec<Record>) -> Self {
        self.datasets.insert(name.into(), rows);
        self
    }
}

impl EntityRepository for InMemoryRepository {
    fn find_all(&self, dataset: &str) -> Result<Vec<Record>, CmlError> {
        self.datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| CmlError::Repository(format!("unknown dataset '{dataset}'")))
    }
}

//==================================================================================
// 3. Registry
//==================================================================================

/// Inputs handed to an action factory when a step is compiled.
pub struct ActionSpec<'a> {
    pub step: &'a str,
    pub params: &'a Value,
    pub repository: Option<Arc<dyn EntityRepository>>,
    /// Offset for actions that format local time and name none themselves.
    pub default_utc_offset: &'a str,
}

impl ActionSpec<'_> {
    /// Deserializes the step params; a missing params block reads as `{}`.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, CmlError> {
        let value = match self.params {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| self.invalid(e))
    }

    pub fn invalid(&self, reason: impl fmt::Display) -> CmlError {
        CmlError::InvalidParams {
            step: self.step.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ActionFactory = Arc<dyn Fn(&ActionSpec<'_>) -> Result<StepAction, CmlError> + Send + Sync>;

/// Maps action identifiers to factories.
#[derive(Clone)]
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
    repository: Option<Arc<dyn EntityRepository>>,
    default_utc_offset: String,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ActionRegistry {
    /// A registry with no actions at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            repository: None,
            default_utc_offset: "UTC".to_string(),
        }
    }

    /// A registry holding every built-in action.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        actions::register_builtins(&mut registry);
        registry
    }

    pub fn with_repository(mut self, repository: Arc<dyn EntityRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_default_utc_offset(mut self, offset: impl Into<String>) -> Self {
        self.default_utc_offset = offset.into();
        self
    }

    /// Registers (or replaces) the factory for `id`.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ActionSpec<'_>) -> Result<StepAction, CmlError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn build(&self, id: &str, step: &str, params: &Value) -> Result<StepAction, CmlError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| CmlError::UnknownAction(id.to_string()))?;
        let spec = ActionSpec {
            step,
            params,
            repository: self.repository.clone(),
            default_utc_offset: &self.default_utc_offset,
        };
        factory(&spec)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.ids())
            .field("repository", &self.repository.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Passthrough;

    impl ItemAction for Passthrough {
        fn apply(&self, item: Record, _ctx: &ActionContext<'_>) -> Result<Vec<Record>, CmlError> {
            Ok(vec![item])
        }
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Params {
        #[serde(default)]
        copies: usize,
    }

    #[test]
    fn test_defaults_and_unknown_action() {
        let registry = ActionRegistry::with_defaults();
        for id in ["header_extract", "session_enrich", "transaction_filter", "array_unwrap", "sort",
                   "entity_preload", "timestamp_convert", "template", "batch_template", "context_dump"] {
            assert!(registry.contains(id), "missing built-in {id}");
        }
        let err = registry.build("nope", "s1", &Value::Null).unwrap_err();
        assert!(matches!(err, CmlError::UnknownAction(ref id) if id == "nope"));
    }

    #[test]
    fn test_custom_registration_and_params() {
        let mut registry = ActionRegistry::empty();
        registry.register("copy", |spec| {
            let params: Params = spec.params()?;
            if params.copies > 3 {
                return Err(spec.invalid("too many copies"));
            }
            Ok(StepAction::item(Passthrough))
        });
        assert_eq!(registry.ids(), vec!["copy"]);
        assert_eq!(registry.build("copy", "s", &Value::Null).unwrap().kind(), "item");

        let err = registry.build("copy", "s", &json!({"copies": 9})).unwrap_err();
        assert!(matches!(err, CmlError::InvalidParams { ref step, .. } if step == "s"));
        let err = registry.build("copy", "s", &json!({"copies": "x"})).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_in_memory_repository() {
        let repo = InMemoryRepository::new().with_dataset("Agent", vec![Record::new()]);
        assert_eq!(repo.find_all("Agent").unwrap().len(), 1);
        assert!(matches!(repo.find_all("Team"), Err(CmlError::Repository(_))));
    }
}
