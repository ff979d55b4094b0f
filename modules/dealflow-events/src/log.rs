//! EventLog — the append-only per-entity fact store.
//!
//! Reads are ordered by seq. Appends with an already-stored (entity, seq)
//! are ignored, not re-applied. Implementations must give linearizable
//! per-entity read/write; nothing is assumed across entities.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::types::{AppendOutcome, StoredEvent};

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event. Duplicate (entity, seq) → `Duplicate`, no write.
    async fn append(&self, event: StoredEvent) -> Result<AppendOutcome>;

    /// All events for an entity in ascending seq order.
    async fn read_for_entity(&self, entity_id: Uuid) -> Result<Vec<StoredEvent>>;

    /// The highest stored seq for an entity, if any.
    async fn latest_seq(&self, entity_id: Uuid) -> Result<Option<u64>>;
}

// ---------------------------------------------------------------------------
// MemoryEventLog (tests and default runtime — no database required)
// ---------------------------------------------------------------------------

/// In-memory event log. Thread-safe; keeps each entity's events in a
/// seq-ordered map so duplicate detection and ordered reads are free.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<BTreeMap<Uuid, BTreeMap<u64, StoredEvent>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored events across all entities (for test assertions).
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: StoredEvent) -> Result<AppendOutcome> {
        let mut events = self.events.lock().unwrap();
        let per_entity = events.entry(event.entity_id).or_default();
        if per_entity.contains_key(&event.seq) {
            debug!(entity_id = %event.entity_id, seq = event.seq, "Duplicate append ignored");
            return Ok(AppendOutcome::Duplicate {
                entity_id: event.entity_id,
                seq: event.seq,
            });
        }
        per_entity.insert(event.seq, event.clone());
        Ok(AppendOutcome::Appended(event))
    }

    async fn read_for_entity(&self, entity_id: Uuid) -> Result<Vec<StoredEvent>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .get(&entity_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_seq(&self, entity_id: Uuid) -> Result<Option<u64>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .get(&entity_id)
            .and_then(|m| m.keys().next_back().copied()))
    }
}

// ---------------------------------------------------------------------------
// Arc<L> blanket — lets the log be shared for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<L: EventLog + ?Sized> EventLog for Arc<L> {
    async fn append(&self, event: StoredEvent) -> Result<AppendOutcome> {
        (**self).append(event).await
    }

    async fn read_for_entity(&self, entity_id: Uuid) -> Result<Vec<StoredEvent>> {
        (**self).read_for_entity(entity_id).await
    }

    async fn latest_seq(&self, entity_id: Uuid) -> Result<Option<u64>> {
        (**self).latest_seq(entity_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn stored(entity_id: Uuid, seq: u64) -> StoredEvent {
        StoredEvent {
            entity_id,
            entity_kind: "lead".into(),
            seq,
            ts: Utc::now(),
            event_type: "activity_logged".into(),
            actor: None,
            payload: json!({"type": "activity_logged", "activity": "call"}),
        }
    }

    #[tokio::test]
    async fn appends_read_back_in_seq_order() {
        let log = MemoryEventLog::new();
        let id = Uuid::new_v4();
        for seq in [2u64, 1, 3] {
            log.append(stored(id, seq)).await.unwrap();
        }
        let events = log.read_for_entity(id).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(log.latest_seq(id).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn duplicate_seq_is_ignored_first_write_wins() {
        let log = MemoryEventLog::new();
        let id = Uuid::new_v4();
        log.append(stored(id, 1)).await.unwrap();

        let mut replay = stored(id, 1);
        replay.event_type = "field_updated".into();
        let outcome = log.append(replay).await.unwrap();
        assert!(outcome.is_duplicate());

        let events = log.read_for_entity(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "activity_logged");
    }

    #[tokio::test]
    async fn entities_are_isolated() {
        let log = MemoryEventLog::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        log.append(stored(a, 1)).await.unwrap();
        assert!(log.read_for_entity(b).await.unwrap().is_empty());
        assert_eq!(log.latest_seq(b).await.unwrap(), None);
    }
}
