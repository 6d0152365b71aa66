//! Guardrails persistence
//!
//! Storage contract for approval requests, their steps and signatures.
//!
//! Design stance:
//! - A signature vote is recorded, tallied and settled in one atomic unit
//!   ([`ApprovalStore::cast_signature`]); callers never read a count and
//!   write a status in two separate calls.
//! - Every backend runs the same settlement rules
//!   ([`guardrails_types::settle`]) inside its own unit.
//! - Postgres is the transactional source of truth; the in-memory store is
//!   a deterministic reference for tests and embedding.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryApprovalStore;
pub use traits::{ApprovalStore, CastOutcome, QueryWindow, RequestFilter};
