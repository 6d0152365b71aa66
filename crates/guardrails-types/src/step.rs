//! Approval steps, signer rules and step behavior flags

use crate::{AttributeMap, Decision, RequestId, StepId, ValidationError, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single approval step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Rejected,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Completed => "completed",
            StepStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(StepStatus::Pending),
            "completed" => Some(StepStatus::Completed),
            "rejected" => Some(StepStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a list of required names is matched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleMode {
    /// Every listed name is required
    #[default]
    All,
    /// At least one listed name is required
    Any,
}

/// Who may sign a step.
///
/// An empty rule (no capabilities, no memberships) admits any authenticated
/// actor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SignerRule {
    /// Guard (actor realm) the signer must belong to, if any
    pub guard: Option<String>,
    #[serde(alias = "permissions")]
    pub capabilities: Vec<String>,
    #[serde(alias = "permissions_mode")]
    pub capabilities_mode: RuleMode,
    #[serde(alias = "roles")]
    pub memberships: Vec<String>,
    #[serde(alias = "roles_mode")]
    pub memberships_mode: RuleMode,
    /// Signer must share a required capability with the initiator
    #[serde(alias = "same_permission_as_initiator")]
    pub same_capability_as_initiator: bool,
    /// Signer must share a required membership with the initiator
    #[serde(alias = "same_role_as_initiator")]
    pub same_membership_as_initiator: bool,
}

impl SignerRule {
    /// Rule requiring a single capability.
    pub fn capability(name: impl Into<String>) -> Self {
        Self {
            capabilities: vec![name.into()],
            ..Self::default()
        }
    }

    /// True when no capability or membership is required.
    pub fn is_open(&self) -> bool {
        self.capabilities.is_empty() && self.memberships.is_empty()
    }

    /// True when the rule compares the signer against the initiator.
    pub fn needs_initiator(&self) -> bool {
        self.same_capability_as_initiator || self.same_membership_as_initiator
    }
}

/// Step-level behavior flags
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepBehavior {
    /// The initiator is a potential signer of this step
    pub include_initiator: bool,
    /// Count the initiator's approval immediately at capture time
    pub preapprove_initiator: bool,
    /// Rejections needed to fail the step; defaults to half the threshold
    pub rejection_min: Option<u32>,
    /// Reported upper bound on rejections; clamped to at least the minimum
    pub rejection_max: Option<u32>,
}

impl Default for StepBehavior {
    fn default() -> Self {
        Self {
            include_initiator: false,
            preapprove_initiator: true,
            rejection_min: None,
            rejection_max: None,
        }
    }
}

impl StepBehavior {
    /// Metadata keys that carry behavior flags rather than free-form meta.
    pub const KEYS: [&'static str; 4] = [
        "include_initiator",
        "preapprove_initiator",
        "rejection_min",
        "rejection_max",
    ];

    /// Check configured rejection bounds.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_rejection_bounds(self.rejection_min, self.rejection_max)
    }

    /// Effective rejection thresholds for a step with the given approval
    /// threshold.
    pub fn rejection_thresholds(&self, threshold: u32) -> RejectionThresholds {
        let threshold = threshold.max(1);
        let min = match self.rejection_min {
            Some(min) if min >= 1 => min,
            _ => threshold.div_ceil(2),
        };
        let max = self.rejection_max.map(|max| max.max(min));
        RejectionThresholds { min, max }
    }
}

/// Validate a (min, max) rejection pair.
pub fn validate_rejection_bounds(min: Option<u32>, max: Option<u32>) -> ValidationResult<()> {
    if let Some(min) = min {
        if min < 1 {
            return Err(ValidationError::InvalidRejectionMinimum(min));
        }
    }
    if let Some(max) = max {
        if max < 1 {
            return Err(ValidationError::InvalidRejectionMaximum(max));
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if max < min {
            return Err(ValidationError::RejectionBoundsInverted { min, max });
        }
    }
    Ok(())
}

/// Effective rejection bounds of a step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionThresholds {
    /// Rejecting signatures needed to fail the step
    pub min: u32,
    /// Upper bound, never below `min`
    pub max: Option<u32>,
}

/// Signature counts of a step, recomputed from the current signature set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StepTally {
    pub approvals: u32,
    pub rejections: u32,
    pub postponements: u32,
}

impl StepTally {
    pub fn from_decisions<I>(decisions: I) -> Self
    where
        I: IntoIterator<Item = Decision>,
    {
        let mut tally = Self::default();
        for decision in decisions {
            match decision {
                Decision::Approved => tally.approvals += 1,
                Decision::Rejected => tally.rejections += 1,
                Decision::Postponed => tally.postponements += 1,
            }
        }
        tally
    }
}

/// One quorum gate of an approval request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub request_id: RequestId,
    /// 1-based position within the request
    pub level: u32,
    pub name: String,
    /// Approving signatures needed to complete the step
    pub threshold: u32,
    pub status: StepStatus,
    pub signer_rule: SignerRule,
    pub behavior: StepBehavior,
    /// Free-form step metadata (summary, hints, ...)
    pub meta: AttributeMap,
    /// Set once the status leaves `Pending`
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalStep {
    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    pub fn rejection_thresholds(&self) -> RejectionThresholds {
        self.behavior.rejection_thresholds(self.threshold)
    }

    /// The status a pending step moves to after `decision` was recorded and
    /// the signature set now tallies to `tally`. `None` keeps it pending.
    ///
    /// Approvals only ever complete a step and rejections only ever reject
    /// it; a postponement never settles anything.
    pub fn verdict(&self, decision: Decision, tally: &StepTally) -> Option<StepStatus> {
        if !self.is_pending() {
            return None;
        }
        match decision {
            Decision::Approved if tally.approvals >= self.threshold.max(1) => {
                Some(StepStatus::Completed)
            }
            Decision::Rejected if tally.rejections >= self.rejection_thresholds().min => {
                Some(StepStatus::Rejected)
            }
            _ => None,
        }
    }
}

/// Payload for persisting a new step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewApprovalStep {
    pub level: u32,
    pub name: String,
    pub threshold: u32,
    pub signer_rule: SignerRule,
    pub behavior: StepBehavior,
    #[serde(default)]
    pub meta: AttributeMap,
}

impl NewApprovalStep {
    pub fn into_step(self, id: StepId, request_id: RequestId, at: DateTime<Utc>) -> ApprovalStep {
        ApprovalStep {
            id,
            request_id,
            level: self.level,
            name: self.name,
            threshold: self.threshold,
            status: StepStatus::Pending,
            signer_rule: self.signer_rule,
            behavior: self.behavior,
            meta: self.meta,
            completed_at: None,
            created_at: at,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step_with(threshold: u32, behavior: StepBehavior) -> ApprovalStep {
        NewApprovalStep {
            level: 1,
            name: "Review".into(),
            threshold,
            signer_rule: SignerRule::default(),
            behavior,
            meta: AttributeMap::new(),
        }
        .into_step(StepId::generate(), RequestId::generate(), Utc::now())
    }

    #[test]
    fn test_default_rejection_minimum_is_half_the_threshold() {
        let step = step_with(4, StepBehavior::default());
        assert_eq!(step.rejection_thresholds().min, 2);

        let one = StepTally {
            rejections: 1,
            ..StepTally::default()
        };
        let two = StepTally {
            rejections: 2,
            ..StepTally::default()
        };
        assert_eq!(step.verdict(Decision::Rejected, &one), None);
        assert_eq!(
            step.verdict(Decision::Rejected, &two),
            Some(StepStatus::Rejected)
        );
    }

    #[test]
    fn test_rejection_max_is_clamped_to_min() {
        let behavior = StepBehavior {
            rejection_min: Some(3),
            rejection_max: Some(1),
            ..StepBehavior::default()
        };
        let thresholds = behavior.rejection_thresholds(1);
        assert_eq!(thresholds, RejectionThresholds { min: 3, max: Some(3) });
    }

    #[test]
    fn test_rejection_bounds_validation() {
        assert!(validate_rejection_bounds(Some(1), None).is_ok());
        assert!(validate_rejection_bounds(None, None).is_ok());
        assert_eq!(
            validate_rejection_bounds(Some(0), None),
            Err(ValidationError::InvalidRejectionMinimum(0))
        );
        assert_eq!(
            validate_rejection_bounds(None, Some(0)),
            Err(ValidationError::InvalidRejectionMaximum(0))
        );
        assert_eq!(
            validate_rejection_bounds(Some(3), Some(2)),
            Err(ValidationError::RejectionBoundsInverted { min: 3, max: 2 })
        );
    }

    #[test]
    fn test_approval_verdict_needs_threshold() {
        let step = step_with(2, StepBehavior::default());
        let tally = StepTally::from_decisions([Decision::Approved, Decision::Rejected]);
        assert_eq!(step.verdict(Decision::Approved, &tally), None);

        let tally = StepTally::from_decisions([Decision::Approved, Decision::Approved]);
        assert_eq!(
            step.verdict(Decision::Approved, &tally),
            Some(StepStatus::Completed)
        );
        // A rejection never completes a step, however many approvals exist.
        assert_eq!(step.verdict(Decision::Rejected, &tally), None);
        assert_eq!(step.verdict(Decision::Postponed, &tally), None);
    }

    #[test]
    fn test_settled_step_has_no_verdict() {
        let mut step = step_with(1, StepBehavior::default());
        step.status = StepStatus::Completed;
        let tally = StepTally::from_decisions([Decision::Rejected]);
        assert_eq!(step.verdict(Decision::Rejected, &tally), None);
    }

    #[test]
    fn test_signer_rule_accepts_permission_aliases() {
        let rule: SignerRule = serde_json::from_value(serde_json::json!({
            "permissions": ["orders.manage"],
            "permissions_mode": "any",
            "roles": ["ops"],
            "same_role_as_initiator": true
        }))
        .unwrap();
        assert_eq!(rule.capabilities, vec!["orders.manage".to_string()]);
        assert_eq!(rule.capabilities_mode, RuleMode::Any);
        assert_eq!(rule.memberships, vec!["ops".to_string()]);
        assert_eq!(rule.memberships_mode, RuleMode::All);
        assert!(rule.same_membership_as_initiator);
        assert!(rule.needs_initiator());
        assert!(!rule.is_open());
    }

    proptest! {
        #[test]
        fn prop_default_rejection_minimum_is_ceil_half(threshold in 1u32..1_000) {
            let thresholds = StepBehavior::default().rejection_thresholds(threshold);
            prop_assert_eq!(thresholds.min, (threshold + 1) / 2);
            prop_assert!(thresholds.min >= 1);
            prop_assert_eq!(thresholds.max, None);
        }

        #[test]
        fn prop_effective_max_never_below_min(min in 1u32..50, max in 1u32..50) {
            let behavior = StepBehavior {
                rejection_min: Some(min),
                rejection_max: Some(max),
                ..StepBehavior::default()
            };
            let thresholds = behavior.rejection_thresholds(10);
            prop_assert_eq!(thresholds.min, min);
            prop_assert!(thresholds.max.unwrap_or(0) >= thresholds.min);
        }
    }
}
