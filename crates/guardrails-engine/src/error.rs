//! Error types for the approval engine

use crate::targets::TargetError;
use guardrails_policy::Denial;
use guardrails_store::StorageError;
use guardrails_types::{
    ActorId, RequestId, RequestState, StepId, StepStatus, TargetRef, ValidationError,
};
use thiserror::Error;

/// Approval engine error type
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Malformed flow or step definition
    #[error("Invalid approval flow: {0}")]
    Validation(#[from] ValidationError),

    /// Decision attempted on a step that already left `pending`
    #[error("Step {step_id} is not pending (status: {status})")]
    StepNotPending { step_id: StepId, status: StepStatus },

    /// The signing policy denied the actor
    #[error("{actor} may not sign step {step_id}: {reason}")]
    IneligibleSigner {
        actor: ActorId,
        step_id: StepId,
        reason: Denial,
    },

    /// Capture could not snapshot the current values of the target
    #[error("Cannot resolve target {target}: {reason}")]
    TargetUnresolvable {
        target: TargetRef,
        #[source]
        reason: TargetError,
    },

    /// The parent request is already terminal
    #[error("Request {request_id} is not pending (state: {state})")]
    RequestNotPending {
        request_id: RequestId,
        state: RequestState,
    },

    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    /// Only the initiator (or a system caller) may cancel a request
    #[error("{actor} did not initiate request {request_id}")]
    NotInitiator {
        request_id: RequestId,
        actor: ActorId,
    },

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

/// Result type for approval engine operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;

impl ApprovalError {
    /// The caller raced a transition that already happened.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ApprovalError::StepNotPending { .. } | ApprovalError::RequestNotPending { .. }
        )
    }

    /// The actor is not allowed to perform the operation.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            ApprovalError::IneligibleSigner { .. } | ApprovalError::NotInitiator { .. }
        )
    }
}

impl From<StorageError> for ApprovalError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StepClosed { step_id, status } => {
                ApprovalError::StepNotPending { step_id, status }
            }
            StorageError::RequestClosed { request_id, state } => {
                ApprovalError::RequestNotPending { request_id, state }
            }
            other => ApprovalError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_rows_map_to_conflicts() {
        let step_id = StepId::generate();
        let err = ApprovalError::from(StorageError::StepClosed {
            step_id,
            status: StepStatus::Completed,
        });
        assert!(matches!(err, ApprovalError::StepNotPending { .. }));
        assert!(err.is_conflict());
        assert!(!err.is_permission_denied());

        let err = ApprovalError::from(StorageError::RequestClosed {
            request_id: RequestId::generate(),
            state: RequestState::Cancelled,
        });
        assert!(matches!(
            err,
            ApprovalError::RequestNotPending {
                state: RequestState::Cancelled,
                ..
            }
        ));

        let err = ApprovalError::from(StorageError::Backend("down".into()));
        assert!(matches!(err, ApprovalError::Storage(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_ineligible_signer_is_permission_denied() {
        let err = ApprovalError::IneligibleSigner {
            actor: ActorId::new("mallory"),
            step_id: StepId::generate(),
            reason: Denial::Anonymous,
        };
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("mallory"));
    }
}
