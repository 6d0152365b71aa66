//! Guardrails engine
//!
//! Human-in-the-loop change approval: a mutation to a guarded entity is
//! captured as a pending [`ApprovalRequest`] and released only after every
//! step of its flow collects enough approving signatures.
//!
//! # Architecture
//!
//! ```text
//! mutation attempt ──► capture ──► store (request + steps)
//!                         │
//!                         ├─► initiator pre-approval
//!                         └─► notification sinks
//!
//! approve / reject ──► signing policy ──► store.cast_signature (atomic)
//!                                             │
//!                                             ├─► apply changes to target
//!                                             └─► notification sinks
//! ```
//!
//! External collaborators are traits: [`TargetRegistry`] reads and writes
//! guarded entities, [`ActorDirectory`] resolves initiators for overlap
//! checks and [`NotificationSink`] observes state transitions.
//!
//! [`ApprovalRequest`]: guardrails_types::ApprovalRequest

#![deny(unsafe_code)]

mod builder;
mod capture;
mod config;
mod decision;
mod directory;
mod error;
mod events;
mod inbox;
mod service;
mod targets;
pub mod telemetry;

pub use builder::ApprovalServiceBuilder;
pub use capture::{AttributeFilter, CaptureOptions, CapturedRequest, Interception};
pub use config::{AuthConfig, ConfigError, DefaultsConfig, GuardrailsConfig};
pub use decision::DecisionOutcome;
pub use directory::{ActorDirectory, InMemoryDirectory};
pub use error::{ApprovalError, ApprovalResult};
pub use events::{ApprovalEvent, NotificationSink, RecordingSink, SinkError, TracingSink};
pub use inbox::{RequestView, StepView};
pub use service::ApprovalService;
pub use targets::{ApprovalPredicate, InMemoryTargets, TargetError, TargetRegistry};

pub use guardrails_flow::{ConfiguredFlows, FlowBuilder};
pub use guardrails_policy::{ActorProfile, PolicyActor};
pub use guardrails_store::{ApprovalStore, InMemoryApprovalStore, QueryWindow, RequestFilter};
