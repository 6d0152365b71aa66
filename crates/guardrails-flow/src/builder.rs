//! Fluent flow builder
//!
//! The builder accumulates a draft step (signer rule and behavior flags) and
//! emits an immutable [`StepDefinition`] every time the draft is finalized.
//! Finalizing resets the draft so nothing leaks into the next step; only the
//! guard carries forward.

use guardrails_types::{
    validate_rejection_bounds, AttributeMap, FlowDefinition, RuleMode, SignerRule, StepBehavior,
    StepDefinition, ValidationError,
};
use tracing::debug;

/// Rule fields of the step under construction
#[derive(Clone, Debug, Default)]
struct DraftStep {
    signers: SignerRule,
    behavior: StepBehavior,
}

impl DraftStep {
    fn with_guard(guard: Option<String>) -> Self {
        Self {
            signers: SignerRule {
                guard,
                ..SignerRule::default()
            },
            behavior: StepBehavior::default(),
        }
    }

    fn has_rule_fields(&self) -> bool {
        !self.signers.capabilities.is_empty()
            || !self.signers.memberships.is_empty()
            || self.signers.guard.is_some()
    }
}

/// Builder for ordered approval flows
///
/// # Example
///
/// ```
/// use guardrails_flow::FlowBuilder;
///
/// let flow = FlowBuilder::new()
///     .any_of_capabilities(["content.publish", "content.review"])
///     .signed_by(1, Some("Editorial"))
///     .memberships(["legal"])
///     .signed_by(2, Some("Legal"))
///     .build();
///
/// assert_eq!(flow.len(), 2);
/// assert!(flow.steps()[1].signers.capabilities.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct FlowBuilder {
    steps: Vec<StepDefinition>,
    current: DraftStep,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder whose steps default to the given guard.
    pub fn with_default_guard(guard: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            current: DraftStep::with_guard(Some(guard.into())),
        }
    }

    pub fn guard(mut self, guard: impl Into<String>) -> Self {
        self.current.signers.guard = Some(guard.into());
        self
    }

    /// Append required capabilities, skipping duplicates.
    pub fn capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        append_unique(&mut self.current.signers.capabilities, names);
        self
    }

    /// Replace the required capabilities.
    pub fn set_capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current.signers.capabilities = names.into_iter().map(Into::into).collect();
        self
    }

    /// Append capabilities and switch to any-of matching.
    pub fn any_of_capabilities<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities(names).require_any_capabilities()
    }

    pub fn require_any_capabilities(mut self) -> Self {
        self.current.signers.capabilities_mode = RuleMode::Any;
        self
    }

    pub fn require_all_capabilities(mut self) -> Self {
        self.current.signers.capabilities_mode = RuleMode::All;
        self
    }

    /// Append required memberships, skipping duplicates.
    pub fn memberships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        append_unique(&mut self.current.signers.memberships, names);
        self
    }

    /// Replace the required memberships.
    pub fn set_memberships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current.signers.memberships = names.into_iter().map(Into::into).collect();
        self
    }

    /// Append memberships and switch to any-of matching.
    pub fn any_of_memberships<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memberships(names).require_any_memberships()
    }

    pub fn require_any_memberships(mut self) -> Self {
        self.current.signers.memberships_mode = RuleMode::Any;
        self
    }

    pub fn require_all_memberships(mut self) -> Self {
        self.current.signers.memberships_mode = RuleMode::All;
        self
    }

    /// Let the initiator sign this step, optionally counting their approval
    /// at capture time.
    pub fn include_initiator(mut self, include: bool, preapprove: bool) -> Self {
        self.current.behavior.include_initiator = include;
        self.current.behavior.preapprove_initiator = preapprove;
        self
    }

    pub fn same_capability_as_initiator(mut self, enable: bool) -> Self {
        self.current.signers.same_capability_as_initiator = enable;
        self
    }

    pub fn same_membership_as_initiator(mut self, enable: bool) -> Self {
        self.current.signers.same_membership_as_initiator = enable;
        self
    }

    /// Set rejection bounds. Both must be at least 1 and `max >= min`.
    pub fn rejection_threshold(
        mut self,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<Self, ValidationError> {
        validate_rejection_bounds(min, max)?;
        self.current.behavior.rejection_min = min;
        self.current.behavior.rejection_max = max;
        Ok(self)
    }

    /// Set the rejection minimum, keeping the current maximum.
    pub fn min_rejections(self, min: u32) -> Result<Self, ValidationError> {
        let max = self.current.behavior.rejection_max;
        self.rejection_threshold(Some(min), max)
    }

    /// Set the rejection maximum, keeping the current minimum.
    pub fn max_rejections(self, max: Option<u32>) -> Result<Self, ValidationError> {
        let min = self.current.behavior.rejection_min;
        self.rejection_threshold(min, max)
    }

    /// Emit the draft as a step and start a fresh draft.
    ///
    /// A threshold of 0 is raised to 1. Unnamed steps are called `Step N`.
    pub fn finalize_step(
        mut self,
        threshold: u32,
        name: Option<&str>,
        extra_meta: AttributeMap,
    ) -> Self {
        let guard = self.current.signers.guard.clone();
        let draft = std::mem::replace(&mut self.current, DraftStep::with_guard(guard));

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Step {}", self.steps.len() + 1));

        debug!(
            step = %name,
            threshold = threshold.max(1),
            capabilities = draft.signers.capabilities.len(),
            memberships = draft.signers.memberships.len(),
            "Finalized flow step"
        );

        self.steps.push(StepDefinition {
            name,
            threshold: threshold.max(1),
            signers: draft.signers,
            behavior: draft.behavior,
            meta: extra_meta,
        });
        self
    }

    /// Finalize the draft without extra metadata.
    pub fn signed_by(self, threshold: u32, name: Option<&str>) -> Self {
        self.finalize_step(threshold, name, AttributeMap::new())
    }

    /// Append a ready-made step. The draft is left untouched.
    pub fn add_step(mut self, mut step: StepDefinition) -> Self {
        if step.name.is_empty() {
            step.name = format!("Step {}", self.steps.len() + 1);
        }
        self.steps.push(step);
        self
    }

    /// Finish the flow.
    ///
    /// When no step was finalized but the draft carries rule fields, a single
    /// step with threshold 1 is emitted.
    pub fn build(self) -> FlowDefinition {
        let builder = if self.steps.is_empty() && self.current.has_rule_fields() {
            self.signed_by(1, None)
        } else {
            self
        };
        FlowDefinition::new(builder.steps)
    }
}

fn append_unique<I, S>(target: &mut Vec<String>, names: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for name in names.into_iter().map(Into::into) {
        if !target.contains(&name) {
            target.push(name);
        }
    }
}
