//! Core domain for the netplane control-plane adapter.
//!
//! Storage-agnostic: the replication models, the repository contracts the
//! storage crate implements, the mutation orchestrator, and the resync
//! coordinator live here.

pub mod config;
pub mod errors;
pub mod mutation;
pub mod replication;

pub use config::{ClientKind, CompensationFailurePolicy, ReplicationConfig};
pub use errors::{DatabaseError, Error, ReplicationError, Result};
