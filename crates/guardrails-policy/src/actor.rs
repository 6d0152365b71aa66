//! Actor introspection traits

use guardrails_types::ActorId;

/// Named-capability introspection (permissions, abilities, scopes)
pub trait CapabilityLookup: Send + Sync {
    fn has_capability(&self, name: &str) -> bool;

    /// Every capability the actor holds.
    fn capability_names(&self) -> Vec<String>;
}

/// Group-membership introspection (roles, teams)
pub trait MembershipLookup: Send + Sync {
    fn is_member_of(&self, name: &str) -> bool;

    /// Every group the actor belongs to.
    fn membership_names(&self) -> Vec<String>;
}

/// An externally-authenticated actor as seen by the signing policy.
///
/// Both lookups are optional. An actor type that cannot answer a question
/// returns `None` and the evaluator fails closed on the checks that need it.
pub trait PolicyActor: Send + Sync {
    fn actor_id(&self) -> &ActorId;

    /// Realm the actor authenticated against, if it reports one
    fn guard(&self) -> Option<&str> {
        None
    }

    fn capabilities(&self) -> Option<&dyn CapabilityLookup> {
        None
    }

    fn memberships(&self) -> Option<&dyn MembershipLookup> {
        None
    }
}
