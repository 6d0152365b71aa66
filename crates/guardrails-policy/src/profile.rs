//! Concrete actor backed by in-memory name sets

use crate::{CapabilityLookup, MembershipLookup, PolicyActor};
use guardrails_types::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A resolved actor with a fixed set of capabilities and memberships.
///
/// Either set can be switched off to model actor types that expose no such
/// introspection at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    id: ActorId,
    guard: Option<String>,
    capabilities: Option<BTreeSet<String>>,
    memberships: Option<BTreeSet<String>>,
}

impl ActorProfile {
    /// Actor exposing both lookups, initially empty.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            guard: None,
            capabilities: Some(BTreeSet::new()),
            memberships: Some(BTreeSet::new()),
        }
    }

    /// Actor exposing no introspection at all.
    pub fn opaque(id: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            guard: None,
            capabilities: None,
            memberships: None,
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .get_or_insert_with(BTreeSet::new)
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_memberships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.memberships
            .get_or_insert_with(BTreeSet::new)
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Drop the membership lookup (capability-only actor).
    pub fn without_memberships(mut self) -> Self {
        self.memberships = None;
        self
    }

    /// Drop the capability lookup.
    pub fn without_capabilities(mut self) -> Self {
        self.capabilities = None;
        self
    }
}

impl PolicyActor for ActorProfile {
    fn actor_id(&self) -> &ActorId {
        &self.id
    }

    fn guard(&self) -> Option<&str> {
        self.guard.as_deref()
    }

    fn capabilities(&self) -> Option<&dyn CapabilityLookup> {
        self.capabilities
            .as_ref()
            .map(|set| set as &dyn CapabilityLookup)
    }

    fn memberships(&self) -> Option<&dyn MembershipLookup> {
        self.memberships
            .as_ref()
            .map(|set| set as &dyn MembershipLookup)
    }
}

impl CapabilityLookup for BTreeSet<String> {
    fn has_capability(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn capability_names(&self) -> Vec<String> {
        self.iter().cloned().collect()
    }
}

impl MembershipLookup for BTreeSet<String> {
    fn is_member_of(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn membership_names(&self) -> Vec<String> {
        self.iter().cloned().collect()
    }
}
