//! Core types for the event log. Domain-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event as stored in the log. Returned by all read methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub entity_id: Uuid,
    /// Opaque stream label (the consumer's entity kind).
    pub entity_kind: String,
    /// Strictly increasing per entity, assigned upstream.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub actor: Option<String>,
    pub payload: serde_json::Value,
}

/// Result of an append. Duplicate (entity, seq) pairs are ignored — the
/// first write wins, which makes replayed submissions idempotent.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(StoredEvent),
    Duplicate { entity_id: Uuid, seq: u64 },
}

impl AppendOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate { .. })
    }
}
