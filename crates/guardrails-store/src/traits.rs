use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardrails_types::{
    ActorId, ApprovalRequest, ApprovalSignature, ApprovalStep, NewApprovalRequest,
    NewApprovalStep, RequestId, RequestState, Settlement, SignatureCast, StepId, StepTally,
};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// Skip `offset` items, then keep at most `limit` (0 keeps all).
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

/// Filter for request listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub state: Option<RequestState>,
    pub initiator_id: Option<ActorId>,
    pub target_kind: Option<String>,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self {
            state: Some(RequestState::Pending),
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.state.map_or(true, |state| request.state == state)
            && self
                .initiator_id
                .as_ref()
                .map_or(true, |id| request.initiator_id.as_ref() == Some(id))
            && self
                .target_kind
                .as_deref()
                .map_or(true, |kind| request.target.kind == kind)
    }
}

/// Result of one atomic vote
#[derive(Debug, Clone)]
pub struct CastOutcome {
    /// The upserted signature row
    pub signature: ApprovalSignature,
    /// The voted step after settlement
    pub step: ApprovalStep,
    /// The parent request after settlement
    pub request: ApprovalRequest,
    /// Counts over the step's current signature set
    pub tally: StepTally,
    /// Transitions caused by this vote
    pub settlement: Settlement,
}

/// Storage interface for approval requests, steps and signatures.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persist a pending request and all of its steps in one unit.
    async fn create_request(
        &self,
        request: NewApprovalRequest,
        steps: Vec<NewApprovalStep>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<(ApprovalRequest, Vec<ApprovalStep>)>;

    async fn get_request(&self, request_id: &RequestId) -> StorageResult<Option<ApprovalRequest>>;

    async fn get_step(&self, step_id: &StepId) -> StorageResult<Option<ApprovalStep>>;

    /// Steps of a request ordered by level.
    async fn list_steps(&self, request_id: &RequestId) -> StorageResult<Vec<ApprovalStep>>;

    /// Signatures of a step, oldest first.
    async fn list_signatures(&self, step_id: &StepId) -> StorageResult<Vec<ApprovalSignature>>;

    /// List requests newest-first.
    async fn list_requests(
        &self,
        filter: RequestFilter,
        window: QueryWindow,
    ) -> StorageResult<Vec<ApprovalRequest>>;

    /// Upsert a vote, recount the step's signatures and settle the step and
    /// its request, as one atomic unit.
    ///
    /// Fails with `StepClosed` / `RequestClosed` when the step or its request
    /// is no longer pending; nothing is written in that case.
    async fn cast_signature(&self, cast: SignatureCast) -> StorageResult<CastOutcome>;

    /// Compare-and-set the state of a request.
    ///
    /// Fails with `RequestClosed` carrying the actual state when it differs
    /// from `expected_from`.
    async fn transition_request(
        &self,
        request_id: &RequestId,
        expected_from: RequestState,
        to: RequestState,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ApprovalRequest>;
}
