//! Workflow & scoring engine.
//!
//! The run loop: events arrive through ingress, are routed to per-entity
//! lanes for strictly ordered processing, and each event flows through
//! persist → score → pipeline → rules. Rule evaluation emits action intents
//! that are handed to a dispatch pool; the engine itself performs no
//! side-effect I/O.
//!
//! Consumers supply a `Dispatcher` (the gateway executing intents) and an
//! `EventLog` (the persistence collaborator).

pub mod dispatch;
pub mod lane;
pub mod orchestrator;
pub mod pipeline;
pub mod rules;
pub mod scoring;
pub mod snapshot;
pub mod traits;

pub use dispatch::{DeadLetter, DispatchPool};
pub use orchestrator::{EntityState, Orchestrator};
pub use rules::FiringLedger;
pub use snapshot::{ConfigSnapshot, SnapshotHandle};
pub use traits::{Ack, Dispatcher, MemoryDispatcher};
