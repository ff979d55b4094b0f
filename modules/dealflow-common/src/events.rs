//! Domain events — immutable facts about CRM entities.
//!
//! Five kinds arrive through ingress; `StageMoved` is synthetic, emitted by
//! the pipeline state machine and fed back into the rule engine within the
//! same processing cycle. Events serialize to `serde_json::Value` for the
//! generic event log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::stage::StageId;
use crate::types::{AttrValue, EntityId, EntityKind};

/// Event kind discriminant. Rules declare the subset they trigger on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EntityCreated,
    FieldUpdated,
    StageMoveRequested,
    ActivityLogged,
    InactivityDetected,
    StageMoved,
}

impl EventKind {
    /// Synthetic kinds are produced by the engine itself and rejected at
    /// ingress.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, EventKind::StageMoved)
    }
}

/// The typed payload of an event.
///
/// The `type` tag becomes the `event_type` column in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    EntityCreated {
        attrs: BTreeMap<String, AttrValue>,
    },
    FieldUpdated {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<AttrValue>,
        new: AttrValue,
    },
    StageMoveRequested {
        from: StageId,
        to: StageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ActivityLogged {
        activity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    InactivityDetected {
        days_inactive: u32,
    },
    /// Synthetic: recorded stage transition, emitted by the pipeline state
    /// machine after a successful move.
    StageMoved {
        from: StageId,
        to: StageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::EntityCreated { .. } => EventKind::EntityCreated,
            EventBody::FieldUpdated { .. } => EventKind::FieldUpdated,
            EventBody::StageMoveRequested { .. } => EventKind::StageMoveRequested,
            EventBody::ActivityLogged { .. } => EventKind::ActivityLogged,
            EventBody::InactivityDetected { .. } => EventKind::InactivityDetected,
            EventBody::StageMoved { .. } => EventKind::StageMoved,
        }
    }

    /// The snake_case event type string for this variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventBody::EntityCreated { .. } => "entity_created",
            EventBody::FieldUpdated { .. } => "field_updated",
            EventBody::StageMoveRequested { .. } => "stage_move_requested",
            EventBody::ActivityLogged { .. } => "activity_logged",
            EventBody::InactivityDetected { .. } => "inactivity_detected",
            EventBody::StageMoved { .. } => "stage_moved",
        }
    }

    /// Serialize to a JSON payload for the event log.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("EventBody serialization should never fail")
    }

    /// Deserialize from a JSON payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

/// An immutable event envelope. `seq` is strictly increasing and gap-free
/// per entity as observed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub entity_id: EntityId,
    pub entity_kind: EntityKind,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub body: EventBody,
}

/// An event as submitted by the upstream API layer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub entity_id: Uuid,
    pub entity_kind: String,
    pub seq: u64,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor: Option<String>,
    pub payload: serde_json::Value,
}

/// Validate and coerce a raw ingress event into a typed `Event`.
///
/// Rejects unknown entity kinds, non-positive sequence numbers, synthetic
/// event types, payloads that fail type coercion, and kind/entity mismatches
/// (stage moves target deals, inactivity targets leads). No side effects.
pub fn normalize(raw: RawEvent) -> Result<Event, EngineError> {
    let entity_kind = EntityKind::parse(&raw.entity_kind).ok_or_else(|| {
        EngineError::Validation(format!("unknown entity kind '{}'", raw.entity_kind))
    })?;

    if raw.seq == 0 {
        return Err(EngineError::Validation(
            "sequence numbers start at 1".to_string(),
        ));
    }

    let body = EventBody::from_payload(&raw.payload)
        .map_err(|e| EngineError::Validation(format!("malformed payload: {e}")))?;

    if body.kind().is_synthetic() {
        return Err(EngineError::Validation(format!(
            "event type '{}' is engine-internal and cannot be submitted",
            body.event_type()
        )));
    }

    match (&body, entity_kind) {
        (EventBody::StageMoveRequested { .. }, k) if k != EntityKind::Deal => {
            return Err(EngineError::Validation(format!(
                "stage_move_requested targets deals, got {k}"
            )));
        }
        (EventBody::InactivityDetected { .. }, k) if k != EntityKind::Lead => {
            return Err(EngineError::Validation(format!(
                "inactivity_detected targets leads, got {k}"
            )));
        }
        _ => {}
    }

    Ok(Event {
        entity_id: raw.entity_id,
        entity_kind,
        seq: raw.seq,
        ts: raw.ts.unwrap_or_else(Utc::now),
        actor: raw.actor,
        body,
    })
}
