use guardrails_types::{ClosedEntity, RequestId, RequestState, StepId, StepStatus};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("{step_id} is already {status}")]
    StepClosed { step_id: StepId, status: StepStatus },

    #[error("{request_id} is already {state}")]
    RequestClosed {
        request_id: RequestId,
        state: RequestState,
    },
}

impl From<ClosedEntity> for StorageError {
    fn from(closed: ClosedEntity) -> Self {
        match closed {
            ClosedEntity::Step { step_id, status } => StorageError::StepClosed { step_id, status },
            ClosedEntity::Request { request_id, state } => {
                StorageError::RequestClosed { request_id, state }
            }
        }
    }
}
