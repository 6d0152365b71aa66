//! Flow overrides read from configuration
//!
//! Flows are stored as a nested JSON-like table. A key such as
//! `orders.approve` is first tried literally, then by walking the dotted
//! segments through nested tables.

use guardrails_types::{AttributeMap, FlowDefinition, ValidationResult};
use serde_json::Value;
use tracing::debug;

/// Configured flow overrides addressed by dotted keys
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfiguredFlows {
    flows: Value,
}

impl ConfiguredFlows {
    pub fn new(flows: Value) -> Self {
        Self { flows }
    }

    /// Raw configured value for `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        let table = self.flows.as_object().filter(|table| !table.is_empty())?;

        if let Some(flow) = table.get(key) {
            return Some(flow);
        }

        key.split('.')
            .try_fold(&self.flows, |node, segment| node.as_object()?.get(segment))
    }

    /// Whether a non-empty flow is configured for `key`.
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some_and(|flow| !is_empty(flow))
    }

    /// Resolve the flow for `key`, falling back to `fallback` when nothing
    /// (or an empty flow) is configured.
    ///
    /// Every step missing a key from `meta_defaults` receives the default;
    /// keys already present are never overridden.
    pub fn resolve(
        &self,
        key: &str,
        fallback: Option<&FlowDefinition>,
        meta_defaults: &AttributeMap,
    ) -> ValidationResult<Option<FlowDefinition>> {
        let steps = match self.lookup(key).filter(|flow| !is_empty(flow)) {
            Some(flow) => {
                debug!(key, "Using configured flow");
                normalize(flow)
            }
            None => match fallback {
                Some(fallback) => fallback.to_config_values(),
                None => return Ok(None),
            },
        };

        let steps: Vec<Value> = steps
            .into_iter()
            .map(|step| merge_meta_defaults(step, meta_defaults))
            .collect();

        FlowDefinition::from_config_values(&steps).map(Some)
    }
}

fn is_empty(flow: &Value) -> bool {
    match flow {
        Value::Null => true,
        Value::Array(steps) => steps.is_empty(),
        Value::Object(table) => table.is_empty(),
        _ => false,
    }
}

/// A single step table (recognized by `name`, `signers` or `threshold`) is
/// wrapped into a one-element list. Anything else that is not a list is
/// treated as a list of its values.
fn normalize(flow: &Value) -> Vec<Value> {
    match flow {
        Value::Array(steps) => steps.clone(),
        Value::Object(table)
            if ["name", "signers", "threshold"]
                .iter()
                .any(|key| table.contains_key(*key)) =>
        {
            vec![flow.clone()]
        }
        Value::Object(table) => table.values().cloned().collect(),
        other => vec![other.clone()],
    }
}

fn merge_meta_defaults(mut step: Value, meta_defaults: &AttributeMap) -> Value {
    if meta_defaults.is_empty() {
        return step;
    }
    let Some(object) = step.as_object_mut() else {
        return step;
    };

    let meta = object
        .entry("meta")
        .or_insert_with(|| Value::Object(AttributeMap::new()));
    if !meta.is_object() {
        *meta = Value::Object(AttributeMap::new());
    }
    if let Value::Object(meta) = meta {
        for (key, value) in meta_defaults {
            meta.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    step
}
