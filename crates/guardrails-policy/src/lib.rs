//! Guardrails signing policy
//!
//! Decides whether an actor is eligible to sign an approval step. The
//! evaluator is a pure function over an actor, a [`SignerRule`] and an
//! optional [`SigningContext`] carrying the initiator of the request.
//!
//! Actors are external: they are described through the [`PolicyActor`]
//! trait, which may or may not expose capability and membership lookups.
//! A missing lookup fails closed for the checks that need it.
//!
//! [`SignerRule`]: guardrails_types::SignerRule

#![deny(unsafe_code)]

mod actor;
mod evaluator;
mod profile;

pub use actor::{CapabilityLookup, MembershipLookup, PolicyActor};
pub use evaluator::{can_sign, evaluate, Denial, Eligibility, SigningContext};
pub use profile::ActorProfile;
