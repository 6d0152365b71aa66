//! Step decision processor
//!
//! `approve`, `reject` and `postpone` share one path: both rows must be
//! pending, the actor must pass the step's signer rule (there is no separate
//! veto rule), and the vote is recorded through the store's atomic
//! `cast_signature`, which recounts the current signature set and settles
//! the step and its request. Notifications go out after the commit.

use crate::error::{ApprovalError, ApprovalResult};
use crate::events::ApprovalEvent;
use crate::service::ApprovalService;
use chrono::Utc;
use guardrails_policy::{evaluate, Eligibility, PolicyActor};
use guardrails_store::CastOutcome;
use guardrails_types::{
    ApprovalRequest, ApprovalSignature, ApprovalStep, Decision, RejectionThresholds, RequestId,
    RequestState, Settlement, SignatureCast, StepId, StepStatus, StepTally,
};
use tracing::{debug, info, instrument, warn};

/// What a single vote did
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub signature: ApprovalSignature,
    /// The voted step after settlement
    pub step: ApprovalStep,
    /// The parent request after settlement
    pub request: ApprovalRequest,
    pub tally: StepTally,
    /// Effective rejection bounds of the step
    pub rejection: RejectionThresholds,
    pub settlement: Settlement,
    /// True when the vote approved the request and the target write
    /// succeeded
    pub changes_applied: bool,
}

impl DecisionOutcome {
    pub fn step_completed(&self) -> bool {
        self.settlement.step_status == Some(StepStatus::Completed)
    }

    pub fn step_rejected(&self) -> bool {
        self.settlement.step_status == Some(StepStatus::Rejected)
    }

    pub fn request_approved(&self) -> bool {
        self.settlement.request_state == Some(RequestState::Approved)
    }

    pub fn request_rejected(&self) -> bool {
        self.settlement.request_state == Some(RequestState::Rejected)
    }
}

impl ApprovalService {
    /// Approve a step. Completing the last pending step approves the request
    /// and writes its changes to the target.
    pub async fn approve(
        &self,
        step_id: &StepId,
        actor: &dyn PolicyActor,
        comment: Option<String>,
    ) -> ApprovalResult<DecisionOutcome> {
        self.decide(step_id, actor, Decision::Approved, comment).await
    }

    /// Reject a step. Reaching the rejection minimum rejects the step and
    /// its request; sibling steps are left as they are.
    pub async fn reject(
        &self,
        step_id: &StepId,
        actor: &dyn PolicyActor,
        comment: Option<String>,
    ) -> ApprovalResult<DecisionOutcome> {
        self.decide(step_id, actor, Decision::Rejected, comment).await
    }

    /// Record a postponement. Never settles anything, but replaces any
    /// earlier vote of the same actor.
    pub async fn postpone(
        &self,
        step_id: &StepId,
        actor: &dyn PolicyActor,
        comment: Option<String>,
    ) -> ApprovalResult<DecisionOutcome> {
        self.decide(step_id, actor, Decision::Postponed, comment).await
    }

    #[instrument(skip(self, actor, comment), fields(step_id = %step_id, signer = %actor.actor_id(), decision = %decision))]
    async fn decide(
        &self,
        step_id: &StepId,
        actor: &dyn PolicyActor,
        decision: Decision,
        comment: Option<String>,
    ) -> ApprovalResult<DecisionOutcome> {
        let step = self
            .store
            .get_step(step_id)
            .await?
            .ok_or(ApprovalError::StepNotFound(*step_id))?;
        if !step.is_pending() {
            return Err(ApprovalError::StepNotPending {
                step_id: step.id,
                status: step.status,
            });
        }

        let request = self
            .store
            .get_request(&step.request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(step.request_id))?;
        if !request.is_pending() {
            return Err(ApprovalError::RequestNotPending {
                request_id: request.id,
                state: request.state,
            });
        }

        let initiator = self
            .resolve_initiator(request.initiator_id.as_ref())
            .await;
        let ctx = initiator.context();
        if let Eligibility::Denied(reason) = evaluate(Some(actor), &step.signer_rule, ctx) {
            warn!(%reason, "Signer rejected by policy");
            return Err(ApprovalError::IneligibleSigner {
                actor: actor.actor_id().clone(),
                step_id: step.id,
                reason,
            });
        }

        let cast =
            SignatureCast::new(step.id, actor.actor_id().clone(), decision).with_comment(comment);
        let CastOutcome {
            signature,
            step,
            request,
            tally,
            settlement,
        } = self.store.cast_signature(cast).await?;

        let rejection = step.rejection_thresholds();
        debug!(
            approvals = tally.approvals,
            rejections = tally.rejections,
            postponements = tally.postponements,
            threshold = step.threshold,
            rejection_min = rejection.min,
            rejection_max = ?rejection.max,
            "Signature recorded"
        );

        let mut changes_applied = false;
        match decision {
            Decision::Approved => {
                self.emit(ApprovalEvent::StepApproved {
                    step: step.clone(),
                    signature: signature.clone(),
                });
                if settlement.step_status == Some(StepStatus::Completed) {
                    info!(level = step.level, "Step completed");
                }
                if settlement.request_state == Some(RequestState::Approved) {
                    changes_applied = self.apply_changes(&request).await;
                    info!(request_id = %request.id, "Request approved");
                    self.emit(ApprovalEvent::RequestCompleted {
                        request: request.clone(),
                        changes_applied,
                    });
                }
            }
            Decision::Rejected => {
                self.emit(ApprovalEvent::StepRejected {
                    step: step.clone(),
                    signature: signature.clone(),
                });
                if settlement.request_state == Some(RequestState::Rejected) {
                    info!(request_id = %request.id, level = step.level, "Request rejected");
                    self.emit(ApprovalEvent::RequestRejected {
                        request: request.clone(),
                        step: step.clone(),
                        signature: signature.clone(),
                    });
                }
            }
            Decision::Postponed => {}
        }

        Ok(DecisionOutcome {
            signature,
            step,
            request,
            tally,
            rejection,
            settlement,
            changes_applied,
        })
    }

    /// Withdraw a pending request.
    ///
    /// Only its initiator, or a system caller passing no actor, may cancel.
    /// Steps are left untouched.
    #[instrument(skip(self, actor, reason), fields(request_id = %request_id))]
    pub async fn cancel(
        &self,
        request_id: &RequestId,
        actor: Option<&dyn PolicyActor>,
        reason: Option<String>,
    ) -> ApprovalResult<ApprovalRequest> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(*request_id))?;

        if let Some(actor) = actor {
            if !request.initiated_by(actor.actor_id()) {
                return Err(ApprovalError::NotInitiator {
                    request_id: request.id,
                    actor: actor.actor_id().clone(),
                });
            }
        }

        if !request.is_pending() {
            return Err(ApprovalError::RequestNotPending {
                request_id: request.id,
                state: request.state,
            });
        }

        let request = self
            .store
            .transition_request(
                request_id,
                RequestState::Pending,
                RequestState::Cancelled,
                Utc::now(),
            )
            .await?;

        info!(reason = ?reason.as_deref(), "Request cancelled");
        self.emit(ApprovalEvent::RequestCancelled {
            request: request.clone(),
            actor: actor.map(|actor| actor.actor_id().clone()),
            reason,
        });

        Ok(request)
    }
}
