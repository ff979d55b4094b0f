//! Generic, domain-agnostic per-entity event log.
//!
//! Stores opaque JSON facts keyed by (entity, seq). Zero knowledge of leads,
//! deals, scores, or any domain concept — consumers provide event types that
//! serialize to `serde_json::Value`.
//!
//! The log is the boundary to the persistence collaborator: production
//! deployments implement `EventLog` over their durable store; tests and the
//! default runtime use `MemoryEventLog`.

pub mod log;
pub mod types;

pub use log::{EventLog, MemoryEventLog};
pub use types::{AppendOutcome, StoredEvent};
