//! Guarded entities as seen by the engine
//!
//! Requests hold a weak [`TargetRef`]; every read of current values and every
//! write of approved values goes through a [`TargetRegistry`].

use async_trait::async_trait;
use guardrails_types::{AttributeMap, FlowDefinition, TargetRef};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

/// Target access errors
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target not found: {0}")]
    NotFound(TargetRef),

    #[error("write rejected: {0}")]
    WriteFailed(String),

    #[error("{0}")]
    Other(String),
}

/// Resolves, describes and updates guarded entities.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Current values of `attributes` on `target`. Attributes the target does
    /// not carry may be omitted.
    async fn snapshot(
        &self,
        target: &TargetRef,
        attributes: &[String],
    ) -> Result<AttributeMap, TargetError>;

    /// Flow the target itself requires for this change, if any.
    async fn flow_for(
        &self,
        _target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<FlowDefinition> {
        None
    }

    /// Request description the target supplies for this change.
    async fn description_for(
        &self,
        _target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<String> {
        None
    }

    /// Request meta the target supplies for this change.
    async fn meta_for(
        &self,
        _target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<AttributeMap> {
        None
    }

    /// Attributes the target declares as guarded. `None` watches every
    /// changed attribute.
    async fn guarded_attributes(&self, _target: &TargetRef) -> Option<Vec<String>> {
        None
    }

    /// Target-specific capture decision over the guarded subset.
    ///
    /// `None` defers to the watch list (capture when anything guarded
    /// changed). `Some(true)` captures even when nothing guarded changed;
    /// `Some(false)` lets the write through.
    async fn requires_approval(
        &self,
        _target: &TargetRef,
        _guarded: &AttributeMap,
        _event: &str,
    ) -> Option<bool> {
        None
    }

    /// Write approved values without re-entering capture.
    async fn apply_changes(
        &self,
        target: &TargetRef,
        changes: &AttributeMap,
    ) -> Result<(), TargetError>;
}

/// Capture predicate over the guarded subset and the event label
pub type ApprovalPredicate = fn(&AttributeMap, &str) -> bool;

/// Per-kind hooks of [`InMemoryTargets`]
#[derive(Clone, Default)]
struct KindHooks {
    flow: Option<FlowDefinition>,
    guarded: Option<Vec<String>>,
    description: Option<String>,
    meta: Option<AttributeMap>,
    requires_approval: Option<ApprovalPredicate>,
}

impl fmt::Debug for KindHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindHooks")
            .field("flow", &self.flow)
            .field("guarded", &self.guarded)
            .field("description", &self.description)
            .field("meta", &self.meta)
            .field("requires_approval", &self.requires_approval.is_some())
            .finish()
    }
}

/// Map-backed registry for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryTargets {
    records: RwLock<HashMap<TargetRef, AttributeMap>>,
    kinds: HashMap<String, KindHooks>,
}

impl InMemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    fn hooks_mut(&mut self, kind: impl Into<String>) -> &mut KindHooks {
        self.kinds.entry(kind.into()).or_default()
    }

    fn hooks(&self, target: &TargetRef) -> Option<&KindHooks> {
        self.kinds.get(&target.kind)
    }

    /// Every target of `kind` requires `flow`.
    pub fn with_flow(mut self, kind: impl Into<String>, flow: FlowDefinition) -> Self {
        self.hooks_mut(kind).flow = Some(flow);
        self
    }

    /// Targets of `kind` guard only `attributes`.
    pub fn with_guarded_attributes<I, S>(mut self, kind: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hooks_mut(kind).guarded = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_description(
        mut self,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.hooks_mut(kind).description = Some(description.into());
        self
    }

    pub fn with_meta(mut self, kind: impl Into<String>, meta: AttributeMap) -> Self {
        self.hooks_mut(kind).meta = Some(meta);
        self
    }

    /// Targets of `kind` decide capture with `predicate`.
    pub fn with_approval_rule(
        mut self,
        kind: impl Into<String>,
        predicate: ApprovalPredicate,
    ) -> Self {
        self.hooks_mut(kind).requires_approval = Some(predicate);
        self
    }

    pub fn insert(&self, target: TargetRef, values: AttributeMap) -> Result<(), TargetError> {
        self.records
            .write()
            .map_err(|_| TargetError::Other("target lock poisoned".into()))?
            .insert(target, values);
        Ok(())
    }

    pub fn get(&self, target: &TargetRef) -> Option<AttributeMap> {
        self.records.read().ok()?.get(target).cloned()
    }

    /// Single attribute of a target, `None` when absent.
    pub fn value(&self, target: &TargetRef, attribute: &str) -> Option<Value> {
        self.get(target)?.get(attribute).cloned()
    }
}

#[async_trait]
impl TargetRegistry for InMemoryTargets {
    async fn snapshot(
        &self,
        target: &TargetRef,
        attributes: &[String],
    ) -> Result<AttributeMap, TargetError> {
        let records = self
            .records
            .read()
            .map_err(|_| TargetError::Other("target lock poisoned".into()))?;
        let record = records
            .get(target)
            .ok_or_else(|| TargetError::NotFound(target.clone()))?;

        Ok(attributes
            .iter()
            .filter_map(|name| record.get(name).map(|value| (name.clone(), value.clone())))
            .collect())
    }

    async fn flow_for(
        &self,
        target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<FlowDefinition> {
        self.hooks(target)?.flow.clone()
    }

    async fn description_for(
        &self,
        target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<String> {
        self.hooks(target)?.description.clone()
    }

    async fn meta_for(
        &self,
        target: &TargetRef,
        _changes: &AttributeMap,
        _event: &str,
    ) -> Option<AttributeMap> {
        self.hooks(target)?.meta.clone()
    }

    async fn guarded_attributes(&self, target: &TargetRef) -> Option<Vec<String>> {
        self.hooks(target)?.guarded.clone()
    }

    async fn requires_approval(
        &self,
        target: &TargetRef,
        guarded: &AttributeMap,
        event: &str,
    ) -> Option<bool> {
        let predicate = self.hooks(target)?.requires_approval?;
        Some(predicate(guarded, event))
    }

    async fn apply_changes(
        &self,
        target: &TargetRef,
        changes: &AttributeMap,
    ) -> Result<(), TargetError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| TargetError::Other("target lock poisoned".into()))?;
        let record = records
            .get_mut(target)
            .ok_or_else(|| TargetError::NotFound(target.clone()))?;
        for (key, value) in changes {
            record.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post() -> (InMemoryTargets, TargetRef) {
        let targets = InMemoryTargets::new();
        let target = TargetRef::new("post", "1");
        let mut values = AttributeMap::new();
        values.insert("title".into(), json!("Draft"));
        values.insert("published".into(), json!(false));
        targets.insert(target.clone(), values).unwrap();
        (targets, target)
    }

    #[tokio::test]
    async fn test_snapshot_restricts_to_requested_keys() {
        let (targets, target) = post();
        let snapshot = targets
            .snapshot(&target, &["published".into(), "slug".into()])
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("published"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let (targets, _) = post();
        let missing = TargetRef::new("post", "404");
        assert!(matches!(
            targets.snapshot(&missing, &[]).await,
            Err(TargetError::NotFound(_))
        ));
        assert!(targets
            .apply_changes(&missing, &AttributeMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_apply_changes_merges_values() {
        let (targets, target) = post();
        let mut changes = AttributeMap::new();
        changes.insert("published".into(), json!(true));
        targets.apply_changes(&target, &changes).await.unwrap();

        assert_eq!(targets.value(&target, "published"), Some(json!(true)));
        assert_eq!(targets.value(&target, "title"), Some(json!("Draft")));
    }

    #[tokio::test]
    async fn test_hooks_are_scoped_by_kind() {
        let targets = InMemoryTargets::new()
            .with_guarded_attributes("post", ["published"])
            .with_description("post", "Publishing needs an editor")
            .with_approval_rule("post", |guarded, _| guarded.contains_key("published"));
        let post = TargetRef::new("post", "1");
        let page = TargetRef::new("page", "1");
        let changes = AttributeMap::new();

        assert_eq!(
            targets.guarded_attributes(&post).await,
            Some(vec!["published".to_string()])
        );
        assert_eq!(
            targets.description_for(&post, &changes, "updating").await.as_deref(),
            Some("Publishing needs an editor")
        );
        assert_eq!(targets.requires_approval(&post, &changes, "updating").await, Some(false));

        assert!(targets.guarded_attributes(&page).await.is_none());
        assert!(targets.meta_for(&page, &changes, "updating").await.is_none());
        assert!(targets.requires_approval(&page, &changes, "updating").await.is_none());
    }
}
