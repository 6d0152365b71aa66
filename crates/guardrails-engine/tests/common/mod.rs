//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use guardrails_engine::{
    ApprovalService, ApprovalServiceBuilder, GuardrailsConfig, InMemoryApprovalStore,
    InMemoryTargets, RecordingSink,
};
use guardrails_types::{AttributeMap, TargetRef};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct Harness {
    pub service: ApprovalService,
    pub targets: Arc<InMemoryTargets>,
    pub sink: Arc<RecordingSink>,
}

pub fn harness() -> Harness {
    harness_with(GuardrailsConfig::default(), InMemoryTargets::new())
}

pub fn harness_with(config: GuardrailsConfig, targets: InMemoryTargets) -> Harness {
    let targets = Arc::new(targets);
    seed_post(&targets);
    let sink = Arc::new(RecordingSink::new());

    let service = ApprovalServiceBuilder::new()
        .with_store(Arc::new(InMemoryApprovalStore::new()))
        .with_targets(targets.clone())
        .with_sink(sink.clone())
        .with_config(config)
        .build()
        .unwrap();

    Harness {
        service,
        targets,
        sink,
    }
}

pub fn post() -> TargetRef {
    TargetRef::new("post", "1")
}

pub fn seed_post(targets: &InMemoryTargets) {
    targets
        .insert(
            post(),
            changes(&[("title", json!("Draft")), ("published", json!(false))]),
        )
        .unwrap();
}

pub fn changes(pairs: &[(&str, Value)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

pub fn publish() -> AttributeMap {
    changes(&[("published", json!(true))])
}
