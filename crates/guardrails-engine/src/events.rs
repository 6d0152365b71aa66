//! Approval notifications
//!
//! Every state transition emits an [`ApprovalEvent`] to the registered
//! [`NotificationSink`]s after it was committed. Sinks are observers: a
//! failing sink is logged and never reverts the transition.

use guardrails_types::{ActorId, ApprovalRequest, ApprovalSignature, ApprovalStep, RequestId};
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// State transition notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    /// A mutation was frozen into a pending request
    Captured {
        request: ApprovalRequest,
        steps: Vec<ApprovalStep>,
    },
    StepApproved {
        step: ApprovalStep,
        signature: ApprovalSignature,
    },
    StepRejected {
        step: ApprovalStep,
        signature: ApprovalSignature,
    },
    /// Every step completed; `changes_applied` reports the target write
    RequestCompleted {
        request: ApprovalRequest,
        changes_applied: bool,
    },
    /// A step rejection killed the request
    RequestRejected {
        request: ApprovalRequest,
        step: ApprovalStep,
        signature: ApprovalSignature,
    },
    RequestCancelled {
        request: ApprovalRequest,
        actor: Option<ActorId>,
        reason: Option<String>,
    },
}

impl ApprovalEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ApprovalEvent::Captured { .. } => "captured",
            ApprovalEvent::StepApproved { .. } => "step_approved",
            ApprovalEvent::StepRejected { .. } => "step_rejected",
            ApprovalEvent::RequestCompleted { .. } => "request_completed",
            ApprovalEvent::RequestRejected { .. } => "request_rejected",
            ApprovalEvent::RequestCancelled { .. } => "request_cancelled",
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            ApprovalEvent::Captured { request, .. }
            | ApprovalEvent::RequestCompleted { request, .. }
            | ApprovalEvent::RequestRejected { request, .. }
            | ApprovalEvent::RequestCancelled { request, .. } => request.id,
            ApprovalEvent::StepApproved { step, .. } | ApprovalEvent::StepRejected { step, .. } => {
                step.request_id
            }
        }
    }
}

/// Delivery failure reported by a sink
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct SinkError(pub String);

/// Observer of approval state transitions
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str {
        "sink"
    }

    fn notify(&self, event: &ApprovalEvent) -> Result<(), SinkError>;
}

/// Logs every event at `info`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn notify(&self, event: &ApprovalEvent) -> Result<(), SinkError> {
        info!(
            event = event.kind(),
            request_id = %event.request_id(),
            "Approval event"
        );
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ApprovalEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ApprovalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Event kinds in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ApprovalEvent::kind).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(&self, event: &ApprovalEvent) -> Result<(), SinkError> {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
        Ok(())
    }
}
