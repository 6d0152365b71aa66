//! PostgreSQL adapter for approval storage.
//!
//! This adapter is designed as the transactional source-of-truth backend.
//! `cast_signature` runs in one transaction that locks the parent request
//! row first and then every step row of that request (by level) before it
//! upserts, recounts and settles, so concurrent votes on sibling steps
//! serialize on the request.

use crate::traits::{ApprovalStore, CastOutcome, QueryWindow, RequestFilter};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardrails_types::{
    check_open, settle, ActorId, ApprovalRequest, ApprovalSignature, ApprovalStep, Decision,
    NewApprovalRequest, NewApprovalStep, RequestId, RequestState, SignatureCast, SignatureId,
    StepId, StepStatus, StepTally, TargetRef,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

const REQUEST_COLUMNS: &str = "id, target_kind, target_id, initiator_id, state, description, \
     new_data, original_data, context, meta, created_at, updated_at";

const STEP_COLUMNS: &str = "id, request_id, level, name, threshold, status, signer_rule, \
     behavior, meta, completed_at, created_at, updated_at";

const SIGNATURE_COLUMNS: &str =
    "id, step_id, signer_id, decision, comment, signed_at, meta, created_at, updated_at";

/// PostgreSQL-backed approval store.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS guardrail_approval_requests (
                id UUID PRIMARY KEY,
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                initiator_id TEXT,
                state TEXT NOT NULL,
                description TEXT,
                new_data JSONB NOT NULL,
                original_data JSONB NOT NULL,
                context JSONB NOT NULL,
                meta JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS guardrail_approval_requests_target_idx
                ON guardrail_approval_requests (target_kind, target_id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS guardrail_approval_requests_state_idx
                ON guardrail_approval_requests (state, created_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS guardrail_approval_steps (
                id UUID PRIMARY KEY,
                request_id UUID NOT NULL REFERENCES guardrail_approval_requests (id) ON DELETE CASCADE,
                level INTEGER NOT NULL,
                name TEXT NOT NULL,
                threshold INTEGER NOT NULL CHECK (threshold >= 1),
                status TEXT NOT NULL,
                signer_rule JSONB NOT NULL,
                behavior JSONB NOT NULL,
                meta JSONB NOT NULL,
                completed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (request_id, level)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS guardrail_approval_signatures (
                id UUID PRIMARY KEY,
                step_id UUID NOT NULL REFERENCES guardrail_approval_steps (id) ON DELETE CASCADE,
                signer_id TEXT NOT NULL,
                decision TEXT NOT NULL,
                comment TEXT,
                signed_at TIMESTAMPTZ NOT NULL,
                meta JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (step_id, signer_id)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PostgresApprovalStore {
    async fn create_request(
        &self,
        request: NewApprovalRequest,
        steps: Vec<NewApprovalStep>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<(ApprovalRequest, Vec<ApprovalStep>)> {
        let request = request.into_request(RequestId::generate(), created_at);
        let mut steps = steps
            .into_iter()
            .map(|step| step.into_step(StepId::generate(), request.id, created_at))
            .collect::<Vec<_>>();
        steps.sort_by_key(|step| step.level);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO guardrail_approval_requests
                (id, target_kind, target_id, initiator_id, state, description,
                 new_data, original_data, context, meta, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(*request.id.as_uuid())
        .bind(request.target.kind.clone())
        .bind(request.target.id.clone())
        .bind(request.initiator_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(request.state.as_str())
        .bind(request.description.clone())
        .bind(serde_json::Value::Object(request.new_data.clone()))
        .bind(serde_json::Value::Object(request.original_data.clone()))
        .bind(serde_json::Value::Object(request.context.clone()))
        .bind(serde_json::Value::Object(request.meta.clone()))
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_conflict)?;

        for step in &steps {
            sqlx::query(
                r#"
                INSERT INTO guardrail_approval_steps
                    (id, request_id, level, name, threshold, status, signer_rule,
                     behavior, meta, completed_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10, $10)
                "#,
            )
            .bind(*step.id.as_uuid())
            .bind(*request.id.as_uuid())
            .bind(to_i32(step.level)?)
            .bind(step.name.clone())
            .bind(to_i32(step.threshold)?)
            .bind(step.status.as_str())
            .bind(to_json(&step.signer_rule)?)
            .bind(to_json(&step.behavior)?)
            .bind(serde_json::Value::Object(step.meta.clone()))
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok((request, steps))
    }

    async fn get_request(&self, request_id: &RequestId) -> StorageResult<Option<ApprovalRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM guardrail_approval_requests WHERE id = $1"
        ))
        .bind(*request_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(request_row_to_record).transpose()
    }

    async fn get_step(&self, step_id: &StepId) -> StorageResult<Option<ApprovalStep>> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM guardrail_approval_steps WHERE id = $1"
        ))
        .bind(*step_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(step_row_to_record).transpose()
    }

    async fn list_steps(&self, request_id: &RequestId) -> StorageResult<Vec<ApprovalStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM guardrail_approval_steps WHERE request_id = $1 ORDER BY level"
        ))
        .bind(*request_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(step_row_to_record).collect()
    }

    async fn list_signatures(&self, step_id: &StepId) -> StorageResult<Vec<ApprovalSignature>> {
        let rows = sqlx::query(&format!(
            "SELECT {SIGNATURE_COLUMNS} FROM guardrail_approval_signatures \
             WHERE step_id = $1 ORDER BY created_at, signer_id"
        ))
        .bind(*step_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(signature_row_to_record).collect()
    }

    async fn list_requests(
        &self,
        filter: RequestFilter,
        window: QueryWindow,
    ) -> StorageResult<Vec<ApprovalRequest>> {
        // NULL parameters disable the corresponding predicate.
        let limit = if window.limit == 0 {
            None
        } else {
            Some(to_i64(window.limit)?)
        };
        let rows = sqlx::query(&format!(
            r#"
            SELECT {REQUEST_COLUMNS}
              FROM guardrail_approval_requests
             WHERE ($1::TEXT IS NULL OR state = $1)
               AND ($2::TEXT IS NULL OR initiator_id = $2)
               AND ($3::TEXT IS NULL OR target_kind = $3)
             ORDER BY created_at DESC, id DESC
             LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.initiator_id.map(|id| id.as_str().to_string()))
        .bind(filter.target_kind)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(request_row_to_record).collect()
    }

    async fn cast_signature(&self, cast: SignatureCast) -> StorageResult<CastOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let parent: Option<Uuid> =
            sqlx::query_scalar("SELECT request_id FROM guardrail_approval_steps WHERE id = $1")
                .bind(*cast.step_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        let request_id = parent
            .map(RequestId::from_uuid)
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", cast.step_id)))?;

        // Lock order: request row, then its steps by level.
        let request_row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM guardrail_approval_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(*request_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?
        .ok_or_else(|| {
            StorageError::InvariantViolation(format!(
                "{} references missing {}",
                cast.step_id, request_id
            ))
        })?;
        let mut request = request_row_to_record(request_row)?;

        let step_rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM guardrail_approval_steps \
             WHERE request_id = $1 ORDER BY level FOR UPDATE"
        ))
        .bind(*request_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut steps = step_rows
            .into_iter()
            .map(step_row_to_record)
            .collect::<StorageResult<Vec<_>>>()?;

        let step = steps
            .iter()
            .find(|step| step.id == cast.step_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{} not found", cast.step_id)))?;
        check_open(&request, &step)?;

        let at = cast.signed_at;
        let decision = cast.decision;
        let fresh = cast.upsert_into(None);
        let signature_row = sqlx::query(&format!(
            r#"
            INSERT INTO guardrail_approval_signatures
                (id, step_id, signer_id, decision, comment, signed_at, meta, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $6, $6)
            ON CONFLICT (step_id, signer_id) DO UPDATE
               SET decision = EXCLUDED.decision,
                   comment = EXCLUDED.comment,
                   signed_at = EXCLUDED.signed_at,
                   meta = EXCLUDED.meta,
                   updated_at = EXCLUDED.updated_at
            RETURNING {SIGNATURE_COLUMNS}
            "#
        ))
        .bind(*fresh.id.as_uuid())
        .bind(*fresh.step_id.as_uuid())
        .bind(fresh.signer_id.as_str())
        .bind(fresh.decision.as_str())
        .bind(fresh.comment.clone())
        .bind(at)
        .bind(serde_json::Value::Object(fresh.meta.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        let signature = signature_row_to_record(signature_row)?;

        let decisions: Vec<String> =
            sqlx::query_scalar("SELECT decision FROM guardrail_approval_signatures WHERE step_id = $1")
                .bind(*step.id.as_uuid())
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        let tally = StepTally::from_decisions(
            decisions
                .iter()
                .map(|raw| parse_decision(raw))
                .collect::<StorageResult<Vec<_>>>()?,
        );
        debug!(
            step_id = %step.id,
            approvals = tally.approvals,
            rejections = tally.rejections,
            postponements = tally.postponements,
            "Recounted step signatures"
        );

        let settlement = settle(&mut request, &mut steps, &step.id, decision, &tally, at);

        if let Some(status) = settlement.step_status {
            sqlx::query(
                r#"
                UPDATE guardrail_approval_steps
                   SET status = $1, completed_at = $2, updated_at = $2
                 WHERE id = $3 AND status = 'pending'
                "#,
            )
            .bind(status.as_str())
            .bind(at)
            .bind(*step.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        if let Some(state) = settlement.request_state {
            sqlx::query(
                r#"
                UPDATE guardrail_approval_requests
                   SET state = $1, updated_at = $2
                 WHERE id = $3 AND state = 'pending'
                "#,
            )
            .bind(state.as_str())
            .bind(at)
            .bind(*request.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let step = steps
            .into_iter()
            .find(|candidate| candidate.id == step.id)
            .unwrap_or(step);

        Ok(CastOutcome {
            signature,
            step,
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
        let row = sqlx::query(&format!(
            r#"
            UPDATE guardrail_approval_requests
               SET state = $1, updated_at = $2
             WHERE id = $3 AND state = $4
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(to.as_str())
        .bind(updated_at)
        .bind(*request_id.as_uuid())
        .bind(expected_from.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => request_row_to_record(row),
            None => match self.get_request(request_id).await? {
                Some(existing) => Err(StorageError::RequestClosed {
                    request_id: *request_id,
                    state: existing.state,
                }),
                None => Err(StorageError::NotFound(format!("{} not found", request_id))),
            },
        }
    }
}

fn request_row_to_record(row: PgRow) -> StorageResult<ApprovalRequest> {
    let state: String = row
        .try_get("state")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let initiator_id: Option<String> = row
        .try_get("initiator_id")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(ApprovalRequest {
        id: RequestId::from_uuid(
            row.try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        target: TargetRef::new(
            row.try_get::<String, _>("target_kind")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            row.try_get::<String, _>("target_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        initiator_id: initiator_id.map(ActorId::new),
        state: RequestState::parse(&state).ok_or_else(|| {
            StorageError::Serialization(format!("unknown request state `{state}`"))
        })?,
        description: row
            .try_get("description")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        new_data: json_object(&row, "new_data")?,
        original_data: json_object(&row, "original_data")?,
        context: json_object(&row, "context")?,
        meta: json_object(&row, "meta")?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn step_row_to_record(row: PgRow) -> StorageResult<ApprovalStep> {
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let signer_rule: serde_json::Value = row
        .try_get("signer_rule")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let behavior: serde_json::Value = row
        .try_get("behavior")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(ApprovalStep {
        id: StepId::from_uuid(
            row.try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        request_id: RequestId::from_uuid(
            row.try_get("request_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        level: from_i32(
            row.try_get("level")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        )?,
        name: row
            .try_get("name")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        threshold: from_i32(
            row.try_get("threshold")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        )?,
        status: StepStatus::parse(&status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown step status `{status}`"))
        })?,
        signer_rule: serde_json::from_value(signer_rule)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        behavior: serde_json::from_value(behavior)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        meta: json_object(&row, "meta")?,
        completed_at: row
            .try_get("completed_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn signature_row_to_record(row: PgRow) -> StorageResult<ApprovalSignature> {
    let decision: String = row
        .try_get("decision")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(ApprovalSignature {
        id: SignatureId::from_uuid(
            row.try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        step_id: StepId::from_uuid(
            row.try_get("step_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        signer_id: ActorId::new(
            row.try_get::<String, _>("signer_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        decision: parse_decision(&decision)?,
        comment: row
            .try_get("comment")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        signed_at: row
            .try_get("signed_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        meta: json_object(&row, "meta")?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn json_object(row: &PgRow, column: &str) -> StorageResult<guardrails_types::AttributeMap> {
    let value: serde_json::Value = row
        .try_get(column)
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(guardrails_types::AttributeMap::new()),
        other => Err(StorageError::Serialization(format!(
            "column `{column}` holds non-object JSON: {other}"
        ))),
    }
}

fn parse_decision(raw: &str) -> StorageResult<Decision> {
    Decision::parse(raw)
        .ok_or_else(|| StorageError::Serialization(format!("unknown decision `{raw}`")))
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}

fn to_i32(value: u32) -> StorageResult<i32> {
    i32::try_from(value)
        .map_err(|_| StorageError::InvalidInput(format!("value {value} out of range")))
}

fn from_i32(value: i32) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative value {value} in column")))
}
