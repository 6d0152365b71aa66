//! Guardrails flow definitions
//!
//! Two independent sources of [`FlowDefinition`]s:
//!
//! - [`FlowBuilder`]: fluent, in-code construction of ordered steps
//! - [`ConfiguredFlows`]: overrides read from configuration and addressed by
//!   dotted `feature.action` keys
//!
//! [`FlowDefinition`]: guardrails_types::FlowDefinition

#![deny(unsafe_code)]

mod builder;
mod configured;

pub use builder::FlowBuilder;
pub use configured::ConfiguredFlows;
