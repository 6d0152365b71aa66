//! Approval requests: one per intercepted mutation

use crate::{ActorId, AttributeMap, RequestId, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an approval request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    #[default]
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RequestState::Pending),
            "approved" => Some(RequestState::Approved),
            "rejected" => Some(RequestState::Rejected),
            "cancelled" => Some(RequestState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frozen mutation awaiting sign-off
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    /// The guarded entity (weak reference)
    pub target: TargetRef,
    /// Actor who attempted the mutation; `None` when system-initiated
    pub initiator_id: Option<ActorId>,
    pub state: RequestState,
    /// Human-readable summary of the captured change
    pub description: Option<String>,
    /// Proposed values, restricted to the guarded attributes
    pub new_data: AttributeMap,
    /// Prior values, same key set as `new_data`
    pub original_data: AttributeMap,
    /// Audit-only context (event, route, ...)
    pub context: AttributeMap,
    /// Caller-supplied metadata, never interpreted here
    pub meta: AttributeMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.state == RequestState::Pending
    }

    /// Whether the given actor initiated this request
    pub fn initiated_by(&self, actor_id: &ActorId) -> bool {
        self.initiator_id.as_ref() == Some(actor_id)
    }
}

/// Payload for persisting a new request. Ids and timestamps are assigned by
/// the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub target: TargetRef,
    pub initiator_id: Option<ActorId>,
    pub description: Option<String>,
    pub new_data: AttributeMap,
    pub original_data: AttributeMap,
    #[serde(default)]
    pub context: AttributeMap,
    #[serde(default)]
    pub meta: AttributeMap,
}

impl NewApprovalRequest {
    /// Materialize into a pending request row.
    pub fn into_request(self, id: RequestId, at: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest {
            id,
            target: self.target,
            initiator_id: self.initiator_id,
            state: RequestState::Pending,
            description: self.description,
            new_data: self.new_data,
            original_data: self.original_data,
            context: self.context,
            meta: self.meta,
            created_at: at,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            RequestState::Pending,
            RequestState::Approved,
            RequestState::Rejected,
            RequestState::Cancelled,
        ] {
            assert_eq!(RequestState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RequestState::parse("archived"), None);
    }

    #[test]
    fn test_new_request_starts_pending() {
        let mut new_data = AttributeMap::new();
        new_data.insert("published".into(), json!(true));

        let request = NewApprovalRequest {
            target: TargetRef::new("post", "1"),
            initiator_id: Some(ActorId::new("editor")),
            description: None,
            new_data,
            original_data: AttributeMap::new(),
            context: AttributeMap::new(),
            meta: AttributeMap::new(),
        }
        .into_request(RequestId::generate(), Utc::now());

        assert!(request.is_pending());
        assert!(!request.state.is_terminal());
        assert!(request.initiated_by(&ActorId::new("editor")));
        assert!(!request.initiated_by(&ActorId::new("reviewer")));
    }
}
