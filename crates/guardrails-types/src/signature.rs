//! Signatures: one vote per (step, signer)

use crate::{ActorId, AttributeMap, SignatureId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A signer's decision on a step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Postponed,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
            Decision::Postponed => "postponed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approved" => Some(Decision::Approved),
            "rejected" => Some(Decision::Rejected),
            "postponed" => Some(Decision::Postponed),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded vote. Re-voting overwrites the row in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSignature {
    pub id: SignatureId,
    pub step_id: StepId,
    pub signer_id: ActorId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub signed_at: DateTime<Utc>,
    pub meta: AttributeMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A vote to be upserted on (step, signer)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureCast {
    pub step_id: StepId,
    pub signer_id: ActorId,
    pub decision: Decision,
    pub comment: Option<String>,
    #[serde(default)]
    pub meta: AttributeMap,
    pub signed_at: DateTime<Utc>,
}

impl SignatureCast {
    pub fn new(step_id: StepId, signer_id: ActorId, decision: Decision) -> Self {
        Self {
            step_id,
            signer_id,
            decision,
            comment: None,
            meta: AttributeMap::new(),
            signed_at: Utc::now(),
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_meta(mut self, meta: AttributeMap) -> Self {
        self.meta = meta;
        self
    }

    /// Apply this vote onto an existing row for the same signer, or create
    /// a fresh row.
    pub fn upsert_into(self, existing: Option<ApprovalSignature>) -> ApprovalSignature {
        match existing {
            Some(mut signature) => {
                signature.decision = self.decision;
                signature.comment = self.comment;
                signature.signed_at = self.signed_at;
                signature.meta = self.meta;
                signature.updated_at = self.signed_at;
                signature
            }
            None => ApprovalSignature {
                id: SignatureId::generate(),
                step_id: self.step_id,
                signer_id: self.signer_id,
                decision: self.decision,
                comment: self.comment,
                signed_at: self.signed_at,
                meta: self.meta,
                created_at: self.signed_at,
                updated_at: self.signed_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_overwrites_decision_and_keeps_identity() {
        let step_id = StepId::generate();
        let first = SignatureCast::new(step_id, ActorId::new("alice"), Decision::Approved)
            .with_comment(Some("looks good".into()))
            .upsert_into(None);

        let second = SignatureCast::new(step_id, ActorId::new("alice"), Decision::Rejected)
            .upsert_into(Some(first.clone()));

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.decision, Decision::Rejected);
        assert_eq!(second.comment, None);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(Decision::parse("postponed"), Some(Decision::Postponed));
        assert_eq!(Decision::parse("maybe"), None);
    }
}
