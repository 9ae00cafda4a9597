//! Pipeline configuration and step compilation.

use std::fs;
use std::path::Path;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CmlError;
use crate::expr::Condition;
use crate::pipeline::action::{ActionRegistry, StepAction};

fn default_enabled() -> bool {
    true
}

fn default_condition() -> String {
    "true".to_string()
}

/// One step declaration as written in the pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub action: String,
    /// Only consulted for item-wise actions.
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub params: Value,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            enabled: true,
            action: action.into(),
            condition: default_condition(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn new(steps: Vec<StepConfig>) -> Self {
        Self { steps }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CmlError> {
        let document: Value = serde_json::from_str(json)?;
        match document.get("steps") {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(CmlError::InvalidPipelineConfig("'steps' must be an array".into()));
            }
            None => {
                return Err(CmlError::InvalidPipelineConfig("missing 'steps' array".into()));
            }
        }
        let config: PipelineConfig = serde_json::from_value(document)
            .map_err(|e| CmlError::InvalidPipelineConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CmlError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Step names must be non-blank and unique, disabled steps included.
    pub fn validate(&self) -> Result<(), CmlError> {
        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            let name = step.name.trim();
            if name.is_empty() {
                return Err(CmlError::InvalidPipelineConfig(format!(
                    "step #{} has a blank name",
                    i + 1
                )));
            }
            if !seen.insert(name) {
                return Err(CmlError::InvalidPipelineConfig(format!(
                    "duplicate step name '{name}'"
                )));
            }
            if step.action.trim().is_empty() {
                return Err(CmlError::InvalidPipelineConfig(format!(
                    "step '{name}' has no action"
                )));
            }
        }
        Ok(())
    }
}

/// An enabled step, ready to run.
#[derive(Debug)]
pub struct CompiledStep {
    pub name: String,
    pub description: String,
    pub action_id: String,
    pub condition: Condition,
    pub action: StepAction,
}

/// Validates the configuration and builds every enabled step, in declaration order.
pub fn compile_steps(
    config: &PipelineConfig,
    registry: &ActionRegistry,
) -> Result<Vec<CompiledStep>, CmlError> {
    config.validate()?;

    config
        .steps
        .iter()
        .filter(|step| step.enabled)
        .map(|step| {
            let condition = Condition::parse(&step.condition).map_err(|e| {
                CmlError::InvalidPipelineConfig(format!(
                    "step '{}': invalid condition: {e}",
                    step.name
                ))
            })?;
            let action = registry.build(step.action.trim(), &step.name, &step.params)?;
            Ok(CompiledStep {
                name: step.name.clone(),
                description: step.description.clone(),
                action_id: step.action.trim().to_string(),
                condition,
                action,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"steps": [{"name": "sort", "action": "sort", "params": {"sortKeys": []}}]}"#,
        )
        .unwrap();
        let step = &config.steps[0];
        assert!(step.enabled);
        assert_eq!(step.condition, "true");
        assert_eq!(step.description, "");
    }

    #[test]
    fn test_structural_errors() {
        for bad in [
            r#"{}"#,
            r#"{"steps": {}}"#,
            r#"{"steps": [{"name": " ", "action": "sort"}]}"#,
            r#"{"steps": [{"name": "a", "action": "sort"}, {"name": "a", "action": "sort", "enabled": false}]}"#,
            r#"{"steps": [{"name": "a"}]}"#,
        ] {
            let err = PipelineConfig::from_json_str(bad).unwrap_err();
            assert!(matches!(err, CmlError::InvalidPipelineConfig(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_compile_skips_disabled_and_rejects_bad_steps() {
        let registry = ActionRegistry::with_defaults();
        let config = PipelineConfig::new(vec![
            StepConfig::new("dump", "context_dump"),
            StepConfig::new("off", "no_such_action").disabled(),
        ]);
        let steps = compile_steps(&config, &registry).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action_id, "context_dump");

        let unknown = PipelineConfig::new(vec![StepConfig::new("x", "no_such_action")]);
        assert!(matches!(compile_steps(&unknown, &registry), Err(CmlError::UnknownAction(_))));

        let bad_condition =
            PipelineConfig::new(vec![StepConfig::new("x", "template").with_condition("a ==")]);
        assert!(matches!(
            compile_steps(&bad_condition, &registry),
            Err(CmlError::InvalidPipelineConfig(_))
        ));
    }
}
