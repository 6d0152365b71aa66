//! Signing policy evaluator
//!
//! [`evaluate`] walks a [`SignerRule`] in a fixed order (guard, capabilities,
//! memberships, initiator overlap) and stops at the first failed check.
//! [`can_sign`] collapses the verdict to a boolean.

use crate::PolicyActor;
use guardrails_types::{RuleMode, SignerRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Inputs beyond the actor and the rule
#[derive(Clone, Copy, Default)]
pub struct SigningContext<'a> {
    /// Resolved initiator of the request being signed, if known
    pub initiator: Option<&'a dyn PolicyActor>,
    /// The request names an initiator but nothing could look them up.
    /// Overlap rules deny instead of being skipped.
    pub initiator_unresolvable: bool,
}

impl<'a> SigningContext<'a> {
    pub fn with_initiator(initiator: Option<&'a dyn PolicyActor>) -> Self {
        Self {
            initiator,
            initiator_unresolvable: false,
        }
    }

    /// Context for a request whose recorded initiator cannot be resolved.
    pub fn unresolvable_initiator() -> Self {
        Self {
            initiator: None,
            initiator_unresolvable: true,
        }
    }
}

impl fmt::Debug for SigningContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field(
                "initiator",
                &self.initiator.map(|actor| actor.actor_id().to_string()),
            )
            .field("initiator_unresolvable", &self.initiator_unresolvable)
            .finish()
    }
}

/// Why an actor may not sign
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    /// No authenticated actor
    Anonymous,
    GuardMismatch { expected: String, actual: String },
    /// The actor type exposes no capability lookup
    CapabilitiesUnsupported,
    MissingCapabilities { mode: RuleMode, required: Vec<String> },
    /// The actor type exposes no membership lookup
    MembershipsUnsupported,
    MissingMemberships { mode: RuleMode, required: Vec<String> },
    NoSharedCapability,
    NoSharedMembership,
    /// An initiator-overlap rule applies but the initiator cannot be looked up
    InitiatorUnresolvable,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Anonymous => f.write_str("no authenticated actor"),
            Denial::GuardMismatch { expected, actual } => {
                write!(f, "guard '{actual}' does not match required guard '{expected}'")
            }
            Denial::CapabilitiesUnsupported => f.write_str("actor exposes no capabilities"),
            Denial::MissingCapabilities { mode, required } => {
                write!(f, "missing capabilities ({}): {}", mode_label(*mode), required.join(", "))
            }
            Denial::MembershipsUnsupported => f.write_str("actor exposes no memberships"),
            Denial::MissingMemberships { mode, required } => {
                write!(f, "missing memberships ({}): {}", mode_label(*mode), required.join(", "))
            }
            Denial::NoSharedCapability => {
                f.write_str("no required capability shared with the initiator")
            }
            Denial::NoSharedMembership => {
                f.write_str("no required membership shared with the initiator")
            }
            Denial::InitiatorUnresolvable => {
                f.write_str("initiator cannot be resolved for the overlap check")
            }
        }
    }
}

fn mode_label(mode: RuleMode) -> &'static str {
    match mode {
        RuleMode::All => "all of",
        RuleMode::Any => "any of",
    }
}

/// Verdict of the signing policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Denied(Denial),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::Denied(denial) => Some(denial),
        }
    }
}

/// Whether `actor` may sign a step governed by `rule`.
pub fn can_sign(actor: Option<&dyn PolicyActor>, rule: &SignerRule, ctx: SigningContext<'_>) -> bool {
    evaluate(actor, rule, ctx).is_eligible()
}

/// Evaluate `rule` for `actor`, reporting the first failed check.
pub fn evaluate(
    actor: Option<&dyn PolicyActor>,
    rule: &SignerRule,
    ctx: SigningContext<'_>,
) -> Eligibility {
    let Some(actor) = actor else {
        return Eligibility::Denied(Denial::Anonymous);
    };

    let verdict = check(actor, rule, ctx);
    if let Eligibility::Denied(denial) = &verdict {
        debug!(actor = %actor.actor_id(), %denial, "Signer not eligible");
    }
    verdict
}

fn check(actor: &dyn PolicyActor, rule: &SignerRule, ctx: SigningContext<'_>) -> Eligibility {
    if let (Some(expected), Some(actual)) = (rule.guard.as_deref(), actor.guard()) {
        if expected != actual {
            return Eligibility::Denied(Denial::GuardMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    if !rule.capabilities.is_empty() {
        let Some(lookup) = actor.capabilities() else {
            return Eligibility::Denied(Denial::CapabilitiesUnsupported);
        };
        if !satisfies(rule.capabilities_mode, &rule.capabilities, |name| {
            lookup.has_capability(name)
        }) {
            return Eligibility::Denied(Denial::MissingCapabilities {
                mode: rule.capabilities_mode,
                required: rule.capabilities.clone(),
            });
        }
    }

    if !rule.memberships.is_empty() {
        let Some(lookup) = actor.memberships() else {
            return Eligibility::Denied(Denial::MembershipsUnsupported);
        };
        if !satisfies(rule.memberships_mode, &rule.memberships, |name| {
            lookup.is_member_of(name)
        }) {
            return Eligibility::Denied(Denial::MissingMemberships {
                mode: rule.memberships_mode,
                required: rule.memberships.clone(),
            });
        }
    }

    if rule.needs_initiator() {
        if let Some(denial) = check_initiator_overlap(actor, rule, ctx) {
            return Eligibility::Denied(denial);
        }
    }

    Eligibility::Eligible
}

fn satisfies(mode: RuleMode, required: &[String], holds: impl Fn(&str) -> bool) -> bool {
    match mode {
        RuleMode::All => required.iter().all(|name| holds(name.as_str())),
        RuleMode::Any => required.iter().any(|name| holds(name.as_str())),
    }
}

/// Overlap checks only run for actors exposing both lookups. An initiator
/// that is simply unknown skips them; one that cannot be resolved denies.
fn check_initiator_overlap(
    actor: &dyn PolicyActor,
    rule: &SignerRule,
    ctx: SigningContext<'_>,
) -> Option<Denial> {
    let (Some(signer_caps), Some(signer_groups)) = (actor.capabilities(), actor.memberships())
    else {
        return None;
    };
    let compares_capabilities = rule.same_capability_as_initiator && !rule.capabilities.is_empty();
    let compares_memberships = rule.same_membership_as_initiator && !rule.memberships.is_empty();
    let Some(initiator) = ctx.initiator else {
        let applies = compares_capabilities || compares_memberships;
        return (applies && ctx.initiator_unresolvable).then_some(Denial::InitiatorUnresolvable);
    };

    if compares_capabilities {
        let initiator_caps = initiator
            .capabilities()
            .map(|lookup| lookup.capability_names())
            .unwrap_or_default();
        if !shares_any(
            &rule.capabilities,
            &signer_caps.capability_names(),
            &initiator_caps,
        ) {
            return Some(Denial::NoSharedCapability);
        }
    }

    if compares_memberships {
        let initiator_groups = initiator
            .memberships()
            .map(|lookup| lookup.membership_names())
            .unwrap_or_default();
        if !shares_any(
            &rule.memberships,
            &signer_groups.membership_names(),
            &initiator_groups,
        ) {
            return Some(Denial::NoSharedMembership);
        }
    }

    None
}

/// Whether {required} ∩ {signer} ∩ {initiator} is non-empty.
fn shares_any(required: &[String], signer: &[String], initiator: &[String]) -> bool {
    let signer: BTreeSet<&str> = signer.iter().map(String::as_str).collect();
    let initiator: BTreeSet<&str> = initiator.iter().map(String::as_str).collect();
    required
        .iter()
        .any(|name| signer.contains(name.as_str()) && initiator.contains(name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActorProfile;
    use proptest::prelude::*;

    fn rule(value: serde_json::Value) -> SignerRule {
        serde_json::from_value(value).unwrap()
    }

    fn sign(actor: &ActorProfile, rule: &SignerRule) -> bool {
        can_sign(Some(actor), rule, SigningContext::default())
    }

    #[test]
    fn test_absent_actor_never_signs() {
        assert!(!can_sign(None, &SignerRule::default(), SigningContext::default()));
        assert_eq!(
            evaluate(None, &SignerRule::default(), SigningContext::default()),
            Eligibility::Denied(Denial::Anonymous)
        );
    }

    #[test]
    fn test_empty_rule_admits_any_actor() {
        assert!(sign(&ActorProfile::opaque("anyone"), &SignerRule::default()));
        assert!(sign(&ActorProfile::new("staff"), &SignerRule::default()));
    }

    #[test]
    fn test_capabilities_all_and_any() {
        let actor = ActorProfile::new("u").with_capabilities(["x", "y"]);

        assert!(sign(&actor, &rule(serde_json::json!({"capabilities": ["x", "y"]}))));
        assert!(!sign(&actor, &rule(serde_json::json!({"capabilities": ["x", "z"]}))));
        assert!(sign(
            &actor,
            &rule(serde_json::json!({"capabilities": ["z", "y"], "capabilities_mode": "any"}))
        ));
        assert!(!sign(
            &actor,
            &rule(serde_json::json!({"capabilities": ["z"], "capabilities_mode": "any"}))
        ));
    }

    #[test]
    fn test_memberships_all_and_any() {
        let actor = ActorProfile::new("u").with_memberships(["editor"]);

        assert!(sign(&actor, &rule(serde_json::json!({"memberships": ["editor"]}))));
        assert!(!sign(
            &actor,
            &rule(serde_json::json!({"memberships": ["editor", "lead"]}))
        ));
        assert!(sign(
            &actor,
            &rule(serde_json::json!({"memberships": ["contrib", "editor"], "memberships_mode": "any"}))
        ));
    }

    #[test]
    fn test_missing_lookup_fails_closed() {
        let no_groups = ActorProfile::new("u")
            .with_capabilities(["x"])
            .without_memberships();
        let verdict = evaluate(
            Some(&no_groups),
            &rule(serde_json::json!({"memberships": ["editor"]})),
            SigningContext::default(),
        );
        assert_eq!(verdict, Eligibility::Denied(Denial::MembershipsUnsupported));

        let opaque = ActorProfile::opaque("u");
        let verdict = evaluate(
            Some(&opaque),
            &SignerRule::capability("x"),
            SigningContext::default(),
        );
        assert_eq!(verdict, Eligibility::Denied(Denial::CapabilitiesUnsupported));
    }

    #[test]
    fn test_guard_mismatch_denies() {
        let mut rule = SignerRule::default();
        rule.guard = Some("staff".into());

        assert!(sign(&ActorProfile::new("a").with_guard("staff"), &rule));
        assert!(!sign(&ActorProfile::new("b").with_guard("customer"), &rule));
        // Actors that report no guard are not filtered by it.
        assert!(sign(&ActorProfile::new("c"), &rule));
    }

    #[test]
    fn test_same_capability_as_initiator() {
        let rule = rule(serde_json::json!({
            "capabilities": ["orders.approve", "orders.refund"],
            "capabilities_mode": "any",
            "same_capability_as_initiator": true
        }));
        let initiator = ActorProfile::new("init").with_capabilities(["orders.refund"]);
        let sharing = ActorProfile::new("a").with_capabilities(["orders.refund"]);
        let disjoint = ActorProfile::new("b").with_capabilities(["orders.approve"]);

        let ctx = SigningContext::with_initiator(Some(&initiator));
        assert!(can_sign(Some(&sharing), &rule, ctx));
        assert_eq!(
            evaluate(Some(&disjoint), &rule, ctx),
            Eligibility::Denied(Denial::NoSharedCapability)
        );

        // Unknown initiator: overlap is skipped.
        assert!(can_sign(Some(&disjoint), &rule, SigningContext::default()));

        // Recorded but unresolvable initiator: overlap fails closed.
        assert_eq!(
            evaluate(Some(&sharing), &rule, SigningContext::unresolvable_initiator()),
            Eligibility::Denied(Denial::InitiatorUnresolvable)
        );
    }

    #[test]
    fn test_unresolvable_initiator_ignored_without_overlap_rule() {
        let actor = ActorProfile::new("a").with_capabilities(["x"]);
        assert!(can_sign(
            Some(&actor),
            &SignerRule::capability("x"),
            SigningContext::unresolvable_initiator()
        ));
    }

    #[test]
    fn test_same_membership_as_initiator() {
        let rule = rule(serde_json::json!({
            "roles": ["ops", "finance"],
            "roles_mode": "any",
            "same_role_as_initiator": true
        }));
        let initiator = ActorProfile::new("init").with_memberships(["finance"]);
        let sharing = ActorProfile::new("a").with_memberships(["finance", "ops"]);
        let disjoint = ActorProfile::new("b").with_memberships(["ops"]);

        let ctx = SigningContext::with_initiator(Some(&initiator));
        assert!(can_sign(Some(&sharing), &rule, ctx));
        assert!(!can_sign(Some(&disjoint), &rule, ctx));
    }

    #[test]
    fn test_overlap_skipped_without_both_lookups() {
        let rule = rule(serde_json::json!({
            "capabilities": ["x"],
            "same_capability_as_initiator": true
        }));
        let initiator = ActorProfile::new("init").with_capabilities(["y"]);
        let capability_only = ActorProfile::new("a")
            .with_capabilities(["x"])
            .without_memberships();

        let ctx = SigningContext::with_initiator(Some(&initiator));
        assert!(can_sign(Some(&capability_only), &rule, ctx));
    }

    proptest! {
        #[test]
        fn prop_all_mode_requires_subset(
            held in proptest::collection::btree_set("[a-d]", 0..4),
            required in proptest::collection::vec("[a-d]", 1..4),
        ) {
            let actor = ActorProfile::new("p").with_capabilities(held.iter().cloned());
            let rule = SignerRule {
                capabilities: required.clone(),
                ..SignerRule::default()
            };
            let expected = required.iter().all(|name| held.contains(name));
            prop_assert_eq!(sign(&actor, &rule), expected);
        }

        #[test]
        fn prop_evaluation_is_deterministic(
            held in proptest::collection::btree_set("[a-d]", 0..4),
            required in proptest::collection::vec("[a-d]", 0..4),
        ) {
            let actor = ActorProfile::new("p").with_capabilities(held.iter().cloned());
            let rule = SignerRule {
                capabilities: required,
                capabilities_mode: RuleMode::Any,
                ..SignerRule::default()
            };
            prop_assert_eq!(sign(&actor, &rule), sign(&actor, &rule));
        }
    }
}
