//! In-memory reference implementation of [`ApprovalStore`].
//!
//! This adapter is deterministic and test-friendly. One lock guards the whole
//! row set, so a vote's upsert, recount and settlement can never interleave
//! with another vote. Production deployments should use a transactional
//! backend (e.g. PostgreSQL) for source-of-truth data.

use crate::traits::{ApprovalStore, CastOutcome, QueryWindow, RequestFilter};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardrails_types::{
    check_open, settle, ActorId, ApprovalRequest, ApprovalSignature, ApprovalStep,
    NewApprovalRequest, NewApprovalStep, RequestId, RequestState, SignatureCast, StepId,
    StepTally,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Default)]
struct Rows {
    requests: HashMap<RequestId, ApprovalRequest>,
    steps: HashMap<StepId, ApprovalStep>,
    signatures: HashMap<(StepId, ActorId), ApprovalSignature>,
}

impl Rows {
    fn steps_of(&self, request_id: &RequestId) -> Vec<ApprovalStep> {
        let mut steps = self
            .steps
            .values()
            .filter(|step| &step.request_id == request_id)
            .cloned()
            .collect::<Vec<_>>();
        steps.sort_by_key(|step| step.level);
        steps
    }

    fn signatures_of(&self, step_id: &StepId) -> Vec<ApprovalSignature> {
        let mut signatures = self
            .signatures
            .values()
            .filter(|signature| &signature.step_id == step_id)
            .cloned()
            .collect::<Vec<_>>();
        signatures.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.signer_id.cmp(&b.signer_id))
        });
        signatures
    }
}

/// In-memory approval store.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    rows: RwLock<Rows>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Rows>> {
        self.rows
            .read()
            .map_err(|_| StorageError::Backend("approval rows lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Rows>> {
        self.rows
            .write()
            .map_err(|_| StorageError::Backend("approval rows lock poisoned".to_string()))
    }
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn create_request(
        &self,
        request: NewApprovalRequest,
        steps: Vec<NewApprovalStep>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<(ApprovalRequest, Vec<ApprovalStep>)> {
        let mut levels = steps.iter().map(|step| step.level).collect::<Vec<_>>();
        levels.sort_unstable();
        levels.dedup();
        if levels.len() != steps.len() {
            return Err(StorageError::InvalidInput(
                "step levels must be unique within a request".to_string(),
            ));
        }

        let request = request.into_request(RequestId::generate(), created_at);
        let mut steps = steps
            .into_iter()
            .map(|step| step.into_step(StepId::generate(), request.id, created_at))
            .collect::<Vec<_>>();
        steps.sort_by_key(|step| step.level);

        let mut guard = self.write()?;
        guard.requests.insert(request.id, request.clone());
        for step in &steps {
            guard.steps.insert(step.id, step.clone());
        }
        Ok((request, steps))
    }

    async fn get_request(&self, request_id: &RequestId) -> StorageResult<Option<ApprovalRequest>> {
        let guard = self.read()?;
        Ok(guard.requests.get(request_id).cloned())
    }

    async fn get_step(&self, step_id: &StepId) -> StorageResult<Option<ApprovalStep>> {
        let guard = self.read()?;
        Ok(guard.steps.get(step_id).cloned())
    }

    async fn list_steps(&self, request_id: &RequestId) -> StorageResult<Vec<ApprovalStep>> {
        let guard = self.read()?;
        Ok(guard.steps_of(request_id))
    }

    async fn list_signatures(&self, step_id: &StepId) -> StorageResult<Vec<ApprovalSignature>> {
        let guard = self.read()?;
        Ok(guard.signatures_of(step_id))
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        window: QueryWindow,
    ) -> StorageResult<Vec<ApprovalRequest>> {
        let guard = self.read()?;
        let mut values = guard
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(window.apply(values))
    }

    async fn cast_signature(&self, cast: SignatureCast) -> StorageResult<CastOutcome> {
        let mut guard = self.write()?;

        let step = guard
            .steps
            .get(&cast.step_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", cast.step_id)))?;
        let mut request = guard.requests.get(&step.request_id).cloned().ok_or_else(|| {
            StorageError::InvariantViolation(format!(
                "{} references missing {}",
                step.id, step.request_id
            ))
        })?;
        check_open(&request, &step)?;

        let at = cast.signed_at;
        let decision = cast.decision;
        let key = (cast.step_id, cast.signer_id.clone());
        let signature = cast.upsert_into(guard.signatures.get(&key).cloned());
        guard.signatures.insert(key, signature.clone());

        let tally = StepTally::from_decisions(
            guard
                .signatures
                .values()
                .filter(|s| s.step_id == step.id)
                .map(|s| s.decision),
        );
        debug!(
            step_id = %step.id,
            approvals = tally.approvals,
            rejections = tally.rejections,
            postponements = tally.postponements,
            "Recounted step signatures"
        );

        let mut steps = guard.steps_of(&request.id);
        let settlement = settle(&mut request, &mut steps, &step.id, decision, &tally, at);

        let mut voted = step;
        if settlement.step_status.is_some() {
            for updated in steps {
                if updated.id == voted.id {
                    voted = updated.clone();
                }
                guard.steps.insert(updated.id, updated);
            }
        }
        if settlement.request_state.is_some() {
            guard.requests.insert(request.id, request.clone());
        }

        Ok(CastOutcome {
            signature,
            step: voted,
            request,
            tally,
            settlement,
        })
    }

    async fn transition_request(
        &self,
        request_id: &RequestId,
        expected_from: RequestState,
        to: RequestState,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<ApprovalRequest> {
        let mut guard = self.write()?;
        let record = guard
            .requests
            .get_mut(request_id)
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", request_id)))?;

        if record.state != expected_from {
            return Err(StorageError::RequestClosed {
                request_id: *request_id,
                state: record.state,
            });
        }

        record.state = to;
        record.updated_at = updated_at;
        Ok(record.clone())
    }
}
