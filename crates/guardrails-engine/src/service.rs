//! The approval service: entry point for capture, decisions and queries
//!
//! Capture lives in `capture.rs`, decisions and cancellation in
//! `decision.rs`, read models in `inbox.rs`. This file holds the shared
//! plumbing (notification fan-out and change application).

use crate::config::GuardrailsConfig;
use crate::directory::ActorDirectory;
use crate::events::{ApprovalEvent, NotificationSink};
use crate::targets::TargetRegistry;
use guardrails_flow::{ConfiguredFlows, FlowBuilder};
use guardrails_policy::{PolicyActor, SigningContext};
use guardrails_store::ApprovalStore;
use guardrails_types::{ActorId, ApprovalRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Approval engine over a store, a target registry and notification sinks
pub struct ApprovalService {
    pub(crate) store: Arc<dyn ApprovalStore>,
    pub(crate) targets: Arc<dyn TargetRegistry>,
    pub(crate) directory: Option<Arc<dyn ActorDirectory>>,
    pub(crate) sinks: Vec<Arc<dyn NotificationSink>>,
    pub(crate) config: GuardrailsConfig,
    pub(crate) flows: ConfiguredFlows,
}

impl ApprovalService {
    pub fn config(&self) -> &GuardrailsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    /// Flow builder preset with the configured guard.
    pub fn flow_builder(&self) -> FlowBuilder {
        self.config.flow_builder()
    }

    /// Deliver `event` to every sink. Failures are logged and swallowed.
    pub(crate) fn emit(&self, event: ApprovalEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.notify(&event) {
                warn!(
                    sink = sink.name(),
                    event = event.kind(),
                    request_id = %event.request_id(),
                    error = %err,
                    "Notification sink failed"
                );
            }
        }
    }

    /// Write the approved values to the target. Returns whether the write
    /// succeeded; a failure never reverts the approval.
    pub(crate) async fn apply_changes(&self, request: &ApprovalRequest) -> bool {
        match self
            .targets
            .apply_changes(&request.target, &request.new_data)
            .await
        {
            Ok(()) => {
                info!(
                    request_id = %request.id,
                    entity = %request.target,
                    attributes = request.new_data.len(),
                    "Applied approved changes"
                );
                true
            }
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    entity = %request.target,
                    error = %err,
                    "Failed to apply approved changes"
                );
                false
            }
        }
    }

    /// Resolve the stored initiator of a request for overlap checks.
    pub(crate) async fn resolve_initiator(
        &self,
        initiator_id: Option<&ActorId>,
    ) -> ResolvedInitiator {
        let Some(initiator_id) = initiator_id else {
            return ResolvedInitiator::Unknown;
        };
        let Some(directory) = self.directory.as_ref() else {
            debug!(initiator = %initiator_id, "No actor directory to resolve initiator");
            return ResolvedInitiator::Unresolvable;
        };
        match directory.find(initiator_id).await {
            Some(actor) => ResolvedInitiator::Found(actor),
            None => ResolvedInitiator::Unknown,
        }
    }
}

/// Outcome of looking up a request's initiator
pub(crate) enum ResolvedInitiator {
    /// System-initiated, or the directory no longer knows the actor
    Unknown,
    Found(Arc<dyn PolicyActor>),
    /// An initiator is recorded but no directory is configured
    Unresolvable,
}

impl ResolvedInitiator {
    pub(crate) fn context(&self) -> SigningContext<'_> {
        match self {
            ResolvedInitiator::Unknown => SigningContext::default(),
            ResolvedInitiator::Found(actor) => SigningContext::with_initiator(Some(actor.as_ref())),
            ResolvedInitiator::Unresolvable => SigningContext::unresolvable_initiator(),
        }
    }
}
