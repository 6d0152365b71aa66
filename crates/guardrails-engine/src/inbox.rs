//! Read models: full request views and per-actor inboxes

use crate::error::{ApprovalError, ApprovalResult};
use crate::service::{ApprovalService, ResolvedInitiator};
use guardrails_policy::{can_sign, PolicyActor};
use guardrails_store::{QueryWindow, RequestFilter};
use guardrails_types::{
    ApprovalRequest, ApprovalSignature, ApprovalStep, RejectionThresholds, RequestId, StepTally,
};
use serde::Serialize;

const INBOX_BATCH: usize = 50;

/// A step with its signatures and current counts
#[derive(Debug, Clone, Serialize)]
pub struct StepView {
    pub step: ApprovalStep,
    /// Oldest first
    pub signatures: Vec<ApprovalSignature>,
    pub tally: StepTally,
    pub rejection: RejectionThresholds,
}

/// A request with every step, ordered by level
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request: ApprovalRequest,
    pub steps: Vec<StepView>,
}

impl RequestView {
    /// Lowest-level step still pending.
    pub fn current_step(&self) -> Option<&StepView> {
        self.steps.iter().find(|view| view.step.is_pending())
    }
}

impl ApprovalService {
    pub async fn request_view(&self, request_id: &RequestId) -> ApprovalResult<RequestView> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(ApprovalError::RequestNotFound(*request_id))?;
        self.view_of(request).await
    }

    /// Pending requests related to `actor`, newest first: initiated by them,
    /// already signed by them, or with a pending step they may sign.
    ///
    /// Pending requests are scanned newest first in batches and the scan
    /// stops once the window is filled.
    pub async fn inbox(
        &self,
        actor: &dyn PolicyActor,
        window: QueryWindow,
    ) -> ApprovalResult<Vec<ApprovalRequest>> {
        let wanted = (window.limit > 0).then(|| window.offset + window.limit);

        let mut related = Vec::new();
        let mut offset = 0;
        'scan: loop {
            let batch = self
                .store
                .list_requests(
                    RequestFilter::pending(),
                    QueryWindow::new(INBOX_BATCH, offset),
                )
                .await?;
            let exhausted = batch.len() < INBOX_BATCH;
            offset += batch.len();

            for request in batch {
                if self.relates_to(&request, actor).await? {
                    related.push(request);
                    if wanted.is_some_and(|wanted| related.len() >= wanted) {
                        break 'scan;
                    }
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(window.apply(related))
    }

    /// Initiator, eligible signer of a pending step, or past signer.
    async fn relates_to(
        &self,
        request: &ApprovalRequest,
        actor: &dyn PolicyActor,
    ) -> ApprovalResult<bool> {
        if request.initiated_by(actor.actor_id()) {
            return Ok(true);
        }

        let steps = self.store.list_steps(&request.id).await?;
        let pending: Vec<&ApprovalStep> = steps.iter().filter(|step| step.is_pending()).collect();
        if !pending.is_empty() {
            let initiator = if pending.iter().any(|step| step.signer_rule.needs_initiator()) {
                self.resolve_initiator(request.initiator_id.as_ref()).await
            } else {
                ResolvedInitiator::Unknown
            };
            let ctx = initiator.context();
            if pending
                .iter()
                .any(|step| can_sign(Some(actor), &step.signer_rule, ctx))
            {
                return Ok(true);
            }
        }

        for step in &steps {
            let signatures = self.store.list_signatures(&step.id).await?;
            if signatures
                .iter()
                .any(|signature| &signature.signer_id == actor.actor_id())
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn view_of(&self, request: ApprovalRequest) -> ApprovalResult<RequestView> {
        let steps = self.store.list_steps(&request.id).await?;

        let mut views = Vec::with_capacity(steps.len());
        for step in steps {
            let signatures = self.store.list_signatures(&step.id).await?;
            let tally = StepTally::from_decisions(signatures.iter().map(|s| s.decision));
            let rejection = step.rejection_thresholds();
            views.push(StepView {
                step,
                signatures,
                tally,
                rejection,
            });
        }

        Ok(RequestView {
            request,
            steps: views,
        })
    }
}
