//! Event boundary tests.
//!
//! These verify the contract between the event enum and the rest of the
//! engine:
//! - Every variant has a deterministic event_type string matching its serde tag
//! - Ingress kinds are distinguishable from synthetic kinds
//! - Payloads survive a JSON roundtrip
//! - normalize() enforces the ingress boundary

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use dealflow_common::events::{normalize, EventBody, EventKind, RawEvent};
use dealflow_common::types::AttrValue;
use serde_json::json;
use uuid::Uuid;

fn all_bodies() -> Vec<EventBody> {
    vec![
        EventBody::EntityCreated {
            attrs: BTreeMap::from([(
                "source".to_string(),
                AttrValue::Choice("webinar".to_string()),
            )]),
        },
        EventBody::FieldUpdated {
            field: "budget".into(),
            old: None,
            new: AttrValue::Number(50_000.0),
        },
        EventBody::StageMoveRequested {
            from: "proposal".into(),
            to: "negotiation".into(),
            reason: None,
        },
        EventBody::ActivityLogged {
            activity: "email_open".into(),
            detail: Some("campaign-42".into()),
        },
        EventBody::InactivityDetected { days_inactive: 14 },
        EventBody::StageMoved {
            from: "proposal".into(),
            to: "negotiation".into(),
            reason: None,
        },
    ]
}

#[test]
fn event_types_are_unique_and_match_serde_tags() {
    let bodies = all_bodies();
    let mut seen = HashSet::new();
    for body in &bodies {
        let et = body.event_type();
        assert!(seen.insert(et), "duplicate event_type string {et}");
        assert_eq!(
            body.to_payload()["type"].as_str().unwrap(),
            et,
            "serde tag mismatch for {et}"
        );
    }
}

#[test]
fn only_stage_moved_is_synthetic() {
    for body in all_bodies() {
        let synthetic = body.kind() == EventKind::StageMoved;
        assert_eq!(body.kind().is_synthetic(), synthetic);
    }
}

#[test]
fn all_bodies_roundtrip_through_payload_json() {
    for body in all_bodies() {
        let back = EventBody::from_payload(&body.to_payload()).unwrap();
        assert_eq!(back, body, "roundtrip changed {}", body.event_type());
    }
}

#[test]
fn normalize_rejects_every_synthetic_kind() {
    for body in all_bodies().into_iter().filter(|b| b.kind().is_synthetic()) {
        let raw = RawEvent {
            entity_id: Uuid::new_v4(),
            entity_kind: "deal".into(),
            seq: 1,
            ts: Some(Utc::now()),
            actor: None,
            payload: body.to_payload(),
        };
        assert!(normalize(raw).is_err(), "{} passed ingress", body.event_type());
    }
}

#[test]
fn normalize_defaults_missing_timestamp() {
    let raw = RawEvent {
        entity_id: Uuid::new_v4(),
        entity_kind: "lead".into(),
        seq: 1,
        ts: None,
        actor: Some("api".into()),
        payload: json!({"type": "entity_created", "attrs": {}}),
    };
    let event = normalize(raw).unwrap();
    assert!(event.ts <= Utc::now());
    assert_eq!(event.actor.as_deref(), Some("api"));
}
