//! Guardrails domain types
//!
//! A guarded mutation is frozen as an [`ApprovalRequest`] and released only
//! after every one of its [`ApprovalStep`]s collects enough approving
//! [`ApprovalSignature`]s.
//!
//! # Key Concepts
//!
//! - **ApprovalRequest**: one per intercepted mutation. Holds the proposed
//!   values, the prior values, and the lifecycle state.
//! - **ApprovalStep**: one quorum gate of a request. All steps of a request
//!   are materialized when the request is captured.
//! - **ApprovalSignature**: one vote per (step, signer). A later vote by the
//!   same signer overwrites the earlier one.
//! - **SignerRule**: who may vote on a step (capabilities, memberships and
//!   initiator overlap constraints).
//! - **StepDefinition**: the blueprint a step is materialized from.
//!
//! The settlement rules (when a step completes or is rejected, and when the
//! parent request follows) live in [`settle`] so that every store applies the
//! exact same rules inside its own atomic unit.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod ids;
mod machine;
mod request;
mod signature;
mod step;

pub use definition::*;
pub use errors::*;
pub use ids::*;
pub use machine::*;
pub use request::*;
pub use signature::*;
pub use step::*;

/// Free-form JSON object used for change sets, context and metadata.
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;
