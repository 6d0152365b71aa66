//! Approval capture
//!
//! Freezes an attempted mutation into a pending request: snapshot the prior
//! values, pick a flow, persist the request with all of its steps, count the
//! initiator's own approval where the flow allows it, then notify.

use crate::error::{ApprovalError, ApprovalResult};
use crate::events::ApprovalEvent;
use crate::service::ApprovalService;
use chrono::Utc;
use guardrails_policy::{can_sign, PolicyActor, SigningContext};
use guardrails_types::{
    ApprovalRequest, ApprovalStep, AttributeMap, Decision, FlowDefinition, NewApprovalRequest,
    RequestId, RequestState, SignatureCast, TargetRef,
};
use serde_json::Value;
use tracing::{debug, info, instrument};

const PREAPPROVAL_COMMENT: &str = "Auto-counted initiator";

/// Per-capture overrides
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Explicit flow, ahead of every other source
    pub flow: Option<FlowDefinition>,
    /// Configured-flow key; defaults to `<kind>.<event>`
    pub flow_key: Option<String>,
    /// Ahead of the target's own description and the default
    pub description: Option<String>,
    /// Ahead of the target's own meta, even when empty
    pub meta: Option<AttributeMap>,
    /// Extra audit context merged over `{event, route}`
    pub context: AttributeMap,
    pub route: Option<String>,
}

impl CaptureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(mut self, flow: FlowDefinition) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_flow_key(mut self, key: impl Into<String>) -> Self {
        self.flow_key = Some(key.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta
            .get_or_insert_with(AttributeMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }
}

/// A persisted request with its steps as they stand after capture
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request: ApprovalRequest,
    /// Ordered by level
    pub steps: Vec<ApprovalStep>,
    /// True when pre-approval completed the request and the target write
    /// succeeded
    pub changes_applied: bool,
}

impl CapturedRequest {
    pub fn request_id(&self) -> RequestId {
        self.request.id
    }
}

/// Watch list for [`ApprovalService::intercept`]
///
/// `only` replaces the target's declared guarded attributes; `except` is
/// removed from whichever list applies. With neither, every attribute the
/// target declares (or every changed attribute) is watched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFilter {
    pub only: Vec<String>,
    pub except: Vec<String>,
}

impl AttributeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.only, names);
        self
    }

    pub fn except<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        extend_unique(&mut self.except, names);
        self
    }

    /// Whether `attribute` is watched given the target's `declared` list.
    pub fn guards(&self, attribute: &str, declared: Option<&[String]>) -> bool {
        let watched = if !self.only.is_empty() {
            contains(&self.only, attribute)
        } else {
            match declared {
                Some(declared) if !declared.is_empty() => contains(declared, attribute),
                _ => true,
            }
        };
        watched && !contains(&self.except, attribute)
    }

    /// The watched subset of `changes`.
    pub fn select(&self, changes: &AttributeMap, declared: Option<&[String]>) -> AttributeMap {
        changes
            .iter()
            .filter(|(name, _)| self.guards(name, declared))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

fn contains(names: &[String], attribute: &str) -> bool {
    names.iter().any(|name| name == attribute)
}

fn extend_unique<I, S>(names: &mut Vec<String>, more: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for name in more {
        let name = name.into();
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

/// Result of [`ApprovalService::intercept`]
#[derive(Debug, Clone)]
pub struct Interception {
    /// Whether a request was created; the caller aborts its write if so
    pub captured: bool,
    pub request: Option<CapturedRequest>,
    /// The guarded subset when captured, the untouched changes otherwise
    pub changes: AttributeMap,
}

impl Interception {
    pub fn request_id(&self) -> Option<RequestId> {
        self.request.as_ref().map(CapturedRequest::request_id)
    }
}

impl ApprovalService {
    /// Capture `changes` to `target` as a pending approval request.
    ///
    /// `event` labels the attempted write (`creating`, `updating`, ...).
    /// `initiator` is the authenticated actor attempting it, `None` for
    /// system writes.
    #[instrument(skip_all, fields(entity = %target, event = %event))]
    pub async fn capture(
        &self,
        target: &TargetRef,
        changes: AttributeMap,
        event: &str,
        initiator: Option<&dyn PolicyActor>,
        options: CaptureOptions,
    ) -> ApprovalResult<CapturedRequest> {
        let original_data = self.snapshot(target, &changes).await?;

        let flow = self.resolve_flow(target, &changes, event, &options).await?;
        flow.validate()?;

        let description = match options.description.clone() {
            Some(description) => description,
            None => self
                .targets
                .description_for(target, &changes, event)
                .await
                .filter(|description| !description.is_empty())
                .unwrap_or_else(|| default_description(target, event, &changes)),
        };
        let meta = match options.meta.clone() {
            Some(meta) => meta,
            None => self
                .targets
                .meta_for(target, &changes, event)
                .await
                .unwrap_or_default(),
        };

        let mut context = AttributeMap::new();
        context.insert("event".into(), Value::String(event.to_string()));
        context.insert(
            "route".into(),
            options.route.clone().map(Value::String).unwrap_or(Value::Null),
        );
        context.extend(options.context);

        let new_request = NewApprovalRequest {
            target: target.clone(),
            initiator_id: initiator.map(|actor| actor.actor_id().clone()),
            description: Some(description),
            new_data: changes,
            original_data,
            context,
            meta,
        };

        let (mut request, mut steps) = self
            .store
            .create_request(new_request, flow.to_new_steps(), Utc::now())
            .await?;

        info!(
            request_id = %request.id,
            steps = steps.len(),
            initiator = ?request.initiator_id.as_ref().map(|id| id.as_str()),
            "Captured approval request"
        );

        if let Some(initiator) = initiator {
            request = self.preapprove(initiator, request, &mut steps).await?;
        }

        self.emit(ApprovalEvent::Captured {
            request: request.clone(),
            steps: steps.clone(),
        });

        let mut changes_applied = false;
        if request.state == RequestState::Approved {
            changes_applied = self.apply_changes(&request).await;
            info!(request_id = %request.id, "Request approved at capture");
            self.emit(ApprovalEvent::RequestCompleted {
                request: request.clone(),
                changes_applied,
            });
        }

        Ok(CapturedRequest {
            request,
            steps,
            changes_applied,
        })
    }

    /// Capture only the attributes `filter` watches.
    ///
    /// The target's [`requires_approval`](crate::TargetRegistry::requires_approval)
    /// hook, when it answers, overrides the watch list. When nothing is
    /// captured the changes come back untouched for the caller to write.
    pub async fn intercept(
        &self,
        target: &TargetRef,
        changes: AttributeMap,
        filter: &AttributeFilter,
        event: &str,
        initiator: Option<&dyn PolicyActor>,
        options: CaptureOptions,
    ) -> ApprovalResult<Interception> {
        let declared = self.targets.guarded_attributes(target).await;
        let guarded = filter.select(&changes, declared.as_deref());

        let required = match self.targets.requires_approval(target, &guarded, event).await {
            Some(required) => required,
            None => !guarded.is_empty(),
        };
        if !required {
            debug!(entity = %target, event, "Change does not require approval");
            return Ok(Interception {
                captured: false,
                request: None,
                changes,
            });
        }

        let captured = self
            .capture(target, guarded.clone(), event, initiator, options)
            .await?;
        Ok(Interception {
            captured: true,
            request: Some(captured),
            changes: guarded,
        })
    }

    /// Prior values of the changed keys; keys the target lacks map to null.
    async fn snapshot(
        &self,
        target: &TargetRef,
        changes: &AttributeMap,
    ) -> ApprovalResult<AttributeMap> {
        let keys: Vec<String> = changes.keys().cloned().collect();
        let mut current = self
            .targets
            .snapshot(target, &keys)
            .await
            .map_err(|reason| ApprovalError::TargetUnresolvable {
                target: target.clone(),
                reason,
            })?;

        Ok(keys
            .into_iter()
            .map(|key| {
                let value = current.remove(&key).unwrap_or(Value::Null);
                (key, value)
            })
            .collect())
    }

    /// Explicit override, then the target's own flow, then configuration,
    /// then the built-in default step. Empty flows are skipped.
    async fn resolve_flow(
        &self,
        target: &TargetRef,
        changes: &AttributeMap,
        event: &str,
        options: &CaptureOptions,
    ) -> ApprovalResult<FlowDefinition> {
        if let Some(flow) = options.flow.as_ref().filter(|flow| !flow.is_empty()) {
            debug!("Using flow from capture options");
            return Ok(flow.clone());
        }

        if let Some(flow) = self
            .targets
            .flow_for(target, changes, event)
            .await
            .filter(|flow| !flow.is_empty())
        {
            debug!("Using flow provided by the target");
            return Ok(flow);
        }

        let key = options
            .flow_key
            .clone()
            .unwrap_or_else(|| format!("{}.{}", target.kind, event));
        let fallback = self.config.default_flow();
        let flow = self
            .flows
            .resolve(&key, Some(&fallback), &self.config.defaults.step_meta)?
            .filter(|flow| !flow.is_empty())
            .unwrap_or(fallback);
        Ok(flow)
    }

    /// Count the initiator's approval on every step that includes them.
    async fn preapprove(
        &self,
        initiator: &dyn PolicyActor,
        mut request: ApprovalRequest,
        steps: &mut [ApprovalStep],
    ) -> ApprovalResult<ApprovalRequest> {
        let ctx = SigningContext::with_initiator(Some(initiator));

        for step in steps.iter_mut() {
            if !request.is_pending() {
                break;
            }
            let behavior = &step.behavior;
            if !(behavior.include_initiator && behavior.preapprove_initiator) {
                continue;
            }
            if !can_sign(Some(initiator), &step.signer_rule, ctx) {
                debug!(step_id = %step.id, "Initiator not eligible for pre-approval");
                continue;
            }

            let cast = SignatureCast::new(step.id, initiator.actor_id().clone(), Decision::Approved)
                .with_comment(Some(PREAPPROVAL_COMMENT.to_string()));
            let outcome = self.store.cast_signature(cast).await?;
            debug!(
                step_id = %step.id,
                approvals = outcome.tally.approvals,
                threshold = step.threshold,
                "Pre-approved by initiator"
            );

            *step = outcome.step;
            request = outcome.request;
        }

        Ok(request)
    }
}

fn event_label(event: &str) -> &str {
    match event {
        "creating" => "creation",
        "updating" => "update",
        "deleting" => "deletion",
        other => other,
    }
}

fn default_description(target: &TargetRef, event: &str, changes: &AttributeMap) -> String {
    let kind = target.display_kind();
    let label = event_label(event);
    if changes.is_empty() {
        format!("{kind} {label} requires approval.")
    } else {
        let attributes: Vec<&str> = changes.keys().map(String::as_str).collect();
        format!(
            "{kind} {label} requires approval ({}).",
            attributes.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(keys: &[&str]) -> AttributeMap {
        keys.iter()
            .map(|key| (key.to_string(), json!(true)))
            .collect()
    }

    #[test]
    fn test_default_description() {
        let target = TargetRef::new("post", "1");
        assert_eq!(
            default_description(&target, "updating", &changes(&["published", "title"])),
            "Post update requires approval (published, title)."
        );
        assert_eq!(
            default_description(&target, "deleting", &AttributeMap::new()),
            "Post deletion requires approval."
        );
        assert_eq!(
            default_description(&target, "archiving", &changes(&["state"])),
            "Post archiving requires approval (state)."
        );
    }

    #[test]
    fn test_attribute_filter() {
        let all = changes(&["published", "title", "body"]);

        let only = AttributeFilter::new().only(["published"]).select(&all, None);
        assert_eq!(only.keys().collect::<Vec<_>>(), vec!["published"]);

        let except = AttributeFilter::new().except(["body"]).select(&all, None);
        assert_eq!(except.len(), 2);
        assert!(!except.contains_key("body"));

        assert_eq!(AttributeFilter::new().select(&all, None), all);
        assert!(AttributeFilter::new().only(["slug"]).select(&all, None).is_empty());
    }

    #[test]
    fn test_attribute_filter_combines_lists() {
        let all = changes(&["published", "title", "body"]);
        let declared = vec!["published".to_string(), "title".to_string()];

        // Declared list applies without `only`.
        let selected = AttributeFilter::new().select(&all, Some(declared.as_slice()));
        assert_eq!(selected.len(), 2);
        assert!(!selected.contains_key("body"));

        // `only` replaces the declared list; `except` trims either.
        let filter = AttributeFilter::new()
            .only(["title", "body"])
            .except(["title"]);
        assert_eq!(
            filter.select(&all, Some(declared.as_slice())).keys().collect::<Vec<_>>(),
            vec!["body"]
        );
        let filter = AttributeFilter::new().except(["published"]);
        assert_eq!(
            filter.select(&all, Some(declared.as_slice())).keys().collect::<Vec<_>>(),
            vec!["title"]
        );

        // An empty declared list watches everything.
        let empty: Vec<String> = Vec::new();
        assert_eq!(AttributeFilter::new().select(&all, Some(empty.as_slice())), all);
    }
}
