//! Settlement rules: how a recorded vote moves a step and its request
//!
//! Stores call [`check_open`] and [`settle`] inside their atomic unit, after
//! the vote has been upserted and the tally recomputed from the current
//! signature set. Nothing here performs I/O.

use crate::{
    ApprovalRequest, ApprovalStep, Decision, RequestId, RequestState, StepId, StepStatus,
    StepTally,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transitions produced by one vote
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// New status of the voted step, if it left `Pending`
    pub step_status: Option<StepStatus>,
    /// New state of the parent request, if it left `Pending`
    pub request_state: Option<RequestState>,
}

impl Settlement {
    pub fn is_noop(&self) -> bool {
        self.step_status.is_none() && self.request_state.is_none()
    }
}

/// Why a vote cannot be recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosedEntity {
    Step { step_id: StepId, status: StepStatus },
    Request { request_id: RequestId, state: RequestState },
}

/// A vote is only accepted while both the step and its request are pending.
pub fn check_open(request: &ApprovalRequest, step: &ApprovalStep) -> Result<(), ClosedEntity> {
    if !step.is_pending() {
        return Err(ClosedEntity::Step {
            step_id: step.id,
            status: step.status,
        });
    }
    if !request.is_pending() {
        return Err(ClosedEntity::Request {
            request_id: request.id,
            state: request.state,
        });
    }
    Ok(())
}

/// Apply the outcome of a vote on `step_id` to the in-memory rows.
///
/// `steps` must hold every step of `request`. The voted step leaves
/// `Pending` at most once. The request becomes `Approved` only when every
/// sibling is `Completed`, and `Rejected` as soon as any step is rejected;
/// sibling steps are never touched.
pub fn settle(
    request: &mut ApprovalRequest,
    steps: &mut [ApprovalStep],
    step_id: &StepId,
    decision: Decision,
    tally: &StepTally,
    at: DateTime<Utc>,
) -> Settlement {
    let mut settlement = Settlement::default();

    let Some(step) = steps.iter_mut().find(|s| &s.id == step_id) else {
        return settlement;
    };

    let Some(status) = step.verdict(decision, tally) else {
        return settlement;
    };

    step.status = status;
    step.completed_at = Some(at);
    step.updated_at = at;
    settlement.step_status = Some(status);

    if !request.is_pending() {
        return settlement;
    }

    let next_state = match status {
        StepStatus::Completed if steps.iter().all(|s| s.status == StepStatus::Completed) => {
            Some(RequestState::Approved)
        }
        StepStatus::Rejected => Some(RequestState::Rejected),
        _ => None,
    };

    if let Some(state) = next_state {
        request.state = state;
        request.updated_at = at;
        settlement.request_state = Some(state);
    }

    settlement
}
