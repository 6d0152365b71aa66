//! Step and flow definitions: blueprints that steps are materialized from
//!
//! Definitions arrive either from the fluent builder or from configuration.
//! The configuration shape keeps behavior flags inside `meta` (or at the top
//! level of the step); [`StepDefinition::from_config_value`] and
//! [`StepDefinition::to_config_value`] translate between that shape and the
//! typed form.

use crate::{
    AttributeMap, NewApprovalStep, SignerRule, StepBehavior, ValidationError, ValidationResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Blueprint of a single approval step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub threshold: u32,
    #[serde(default)]
    pub signers: SignerRule,
    #[serde(default)]
    pub behavior: StepBehavior,
    /// Free-form metadata, never containing behavior keys
    #[serde(default)]
    pub meta: AttributeMap,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, threshold: u32, signers: SignerRule) -> Self {
        Self {
            name: name.into(),
            threshold,
            signers,
            behavior: StepBehavior::default(),
            meta: AttributeMap::new(),
        }
    }

    pub fn with_behavior(mut self, behavior: StepBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.threshold < 1 {
            return Err(ValidationError::InvalidThreshold {
                step: self.name.clone(),
            });
        }
        self.behavior.validate()
    }

    /// Materialize at the given 1-based level.
    pub fn to_new_step(&self, level: u32) -> NewApprovalStep {
        NewApprovalStep {
            level,
            name: self.name.clone(),
            threshold: self.threshold,
            signer_rule: self.signers.clone(),
            behavior: self.behavior.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Parse a step written in configuration shape.
    ///
    /// `position` is the 1-based position in its flow and only used for the
    /// default name.
    pub fn from_config_value(value: &Value, position: usize) -> ValidationResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::MalformedStep(format!("step {position} is not an object"))
        })?;

        let name = match object.get("name") {
            None | Some(Value::Null) => format!("Step {position}"),
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(ValidationError::MalformedStep(format!(
                    "step {position} has a non-string name: {other}"
                )))
            }
        };

        let threshold = match object.get("threshold") {
            None | Some(Value::Null) => 1,
            Some(raw) => read_count(raw, "threshold", &name)?,
        };

        let signers = match object.get("signers") {
            None | Some(Value::Null) => SignerRule::default(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                ValidationError::MalformedStep(format!("step '{name}' has invalid signers: {e}"))
            })?,
        };

        let mut meta = match object.get("meta") {
            None | Some(Value::Null) => AttributeMap::new(),
            Some(Value::Object(meta)) => meta.clone(),
            Some(other) => {
                return Err(ValidationError::MalformedStep(format!(
                    "step '{name}' has non-object meta: {other}"
                )))
            }
        };

        // Behavior flags may sit in meta or directly on the step; meta wins.
        let mut flag = |key: &str| meta.remove(key).or_else(|| object.get(key).cloned());
        let include_initiator = flag("include_initiator");
        let preapprove_initiator = flag("preapprove_initiator");
        let rejection_min = flag("rejection_min");
        let rejection_max = flag("rejection_max");

        let defaults = StepBehavior::default();
        let behavior = StepBehavior {
            include_initiator: read_flag(include_initiator, defaults.include_initiator, &name)?,
            preapprove_initiator: read_flag(
                preapprove_initiator,
                defaults.preapprove_initiator,
                &name,
            )?,
            rejection_min: read_optional_count(rejection_min, "rejection_min", &name)?,
            rejection_max: read_optional_count(rejection_max, "rejection_max", &name)?,
        };

        let step = Self {
            name,
            threshold,
            signers,
            behavior,
            meta,
        };
        step.validate()?;
        Ok(step)
    }

    /// Render in configuration shape, behavior flags inside `meta`.
    pub fn to_config_value(&self) -> Value {
        let mut meta = self.meta.clone();
        meta.insert(
            "include_initiator".into(),
            Value::Bool(self.behavior.include_initiator),
        );
        meta.insert(
            "preapprove_initiator".into(),
            Value::Bool(self.behavior.preapprove_initiator),
        );
        meta.insert(
            "rejection_min".into(),
            self.behavior.rejection_min.map(Value::from).unwrap_or(Value::Null),
        );
        meta.insert(
            "rejection_max".into(),
            self.behavior.rejection_max.map(Value::from).unwrap_or(Value::Null),
        );

        let mut object = AttributeMap::new();
        object.insert("name".into(), Value::String(self.name.clone()));
        object.insert("threshold".into(), Value::from(self.threshold));
        object.insert(
            "signers".into(),
            serde_json::to_value(&self.signers).unwrap_or(Value::Null),
        );
        object.insert("meta".into(), Value::Object(meta));
        Value::Object(object)
    }
}

/// Ordered list of step definitions applied to a captured request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowDefinition {
    steps: Vec<StepDefinition>,
}

impl FlowDefinition {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self { steps }
    }

    /// The built-in single step used when nothing else provides a flow.
    pub fn single(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::new(vec![StepDefinition::new(
            name,
            1,
            SignerRule::capability(capability),
        )])
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn validate(&self) -> ValidationResult<()> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptyFlow);
        }
        self.steps.iter().try_for_each(StepDefinition::validate)
    }

    /// Materialize steps with levels 1..=n in order.
    pub fn to_new_steps(&self) -> Vec<NewApprovalStep> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| step.to_new_step(i as u32 + 1))
            .collect()
    }

    /// Parse a flow written in configuration shape (list of steps).
    pub fn from_config_values(values: &[Value]) -> ValidationResult<Self> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| StepDefinition::from_config_value(value, i + 1))
            .collect::<ValidationResult<Vec<_>>>()
            .map(Self::new)
    }

    pub fn to_config_values(&self) -> Vec<Value> {
        self.steps.iter().map(StepDefinition::to_config_value).collect()
    }
}

impl From<Vec<StepDefinition>> for FlowDefinition {
    fn from(steps: Vec<StepDefinition>) -> Self {
        Self::new(steps)
    }
}

impl IntoIterator for FlowDefinition {
    type Item = StepDefinition;
    type IntoIter = std::vec::IntoIter<StepDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

fn read_count(raw: &Value, field: &str, step: &str) -> ValidationResult<u32> {
    raw.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            ValidationError::MalformedStep(format!(
                "step '{step}' has a non-integer {field}: {raw}"
            ))
        })
}

fn read_optional_count(raw: Option<Value>, field: &str, step: &str) -> ValidationResult<Option<u32>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => read_count(&value, field, step).map(Some),
    }
}

fn read_flag(raw: Option<Value>, default: bool, step: &str) -> ValidationResult<bool> {
    match raw {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(flag),
        Some(other) => Err(ValidationError::MalformedStep(format!(
            "step '{step}' has a non-boolean flag: {other}"
        ))),
    }
}
