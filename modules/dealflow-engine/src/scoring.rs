//! Lead scoring — pure recomputation from entity snapshot + event history.
//!
//! Deterministic: the same (entity, history, rubric) always produces the
//! same score. No wall-clock reads, no hidden state; the caller passes the
//! timestamp recorded on the resulting score.

use chrono::{DateTime, Utc};
use dealflow_common::events::EventBody;
use dealflow_common::score::{Score, ScoringRubric, SignalContribution, SignalKind};
use dealflow_common::types::Entity;

/// Compute a lead's score from the rubric's weighted signals, clamped to
/// [0, 100]. Missing signal inputs contribute zero, never an error.
pub fn compute_score(
    entity: &Entity,
    history: &[EventBody],
    rubric: &ScoringRubric,
    computed_at: DateTime<Utc>,
) -> Score {
    let mut contributions = Vec::new();
    let mut total = 0.0;

    for signal in &rubric.signals {
        let weight = signal_weight(&signal.kind, signal.weight, entity, history);
        if weight != 0.0 {
            total += weight;
            contributions.push(SignalContribution {
                signal_id: signal.id.clone(),
                weight,
            });
        }
    }

    let value = total.clamp(0.0, 100.0);
    Score {
        value,
        tier: rubric.thresholds.tier_for(value),
        contributions,
        rubric_version: rubric.version,
        computed_at,
    }
}

/// Total weight one signal contributes for this entity and history.
fn signal_weight(kind: &SignalKind, weight: f64, entity: &Entity, history: &[EventBody]) -> f64 {
    match kind {
        SignalKind::AttributePresent { field } => {
            if entity.attr(field).is_some() {
                weight
            } else {
                0.0
            }
        }

        SignalKind::AttributeEquals { field, value } => {
            if entity.attr(field) == Some(value) {
                weight
            } else {
                0.0
            }
        }

        SignalKind::ActivityLogged { activity } => {
            let count = history
                .iter()
                .filter(|body| {
                    matches!(body, EventBody::ActivityLogged { activity: a, .. } if a == activity)
                })
                .count();
            weight * count as f64
        }

        // Applies only while the entity is currently inactive: the last
        // activity-related event must be an InactivityDetected of at least
        // the configured span. Logged activity resets it.
        SignalKind::InactivityExceeds { days } => {
            let last_activity_event = history.iter().rev().find(|body| {
                matches!(
                    body,
                    EventBody::ActivityLogged { .. } | EventBody::InactivityDetected { .. }
                )
            });
            match last_activity_event {
                Some(EventBody::InactivityDetected { days_inactive }) if days_inactive >= days => {
                    weight
                }
                _ => 0.0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use dealflow_common::score::Tier;
    use dealflow_common::types::{AttrValue, EntityKind};
    use uuid::Uuid;

    fn lead_with(attrs: &[(&str, AttrValue)]) -> Entity {
        let map: BTreeMap<String, AttrValue> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Entity::new(Uuid::new_v4(), EntityKind::Lead, map, Utc::now())
    }

    #[test]
    fn webinar_source_scores_twenty_cold() {
        let entity = lead_with(&[("source", AttrValue::Choice("webinar".into()))]);
        let score = compute_score(&entity, &[], &ScoringRubric::default_crm(), Utc::now());
        assert_eq!(score.value, 20.0);
        assert_eq!(score.tier, Tier::Cold);
        assert_eq!(score.contributions.len(), 1);
        assert_eq!(score.contributions[0].signal_id, "source_webinar");
    }

    #[test]
    fn email_open_adds_five_per_occurrence() {
        let entity = lead_with(&[("source", AttrValue::Choice("webinar".into()))]);
        let history = vec![
            EventBody::ActivityLogged { activity: "email_open".into(), detail: None },
            EventBody::ActivityLogged { activity: "email_open".into(), detail: None },
        ];
        let score = compute_score(&entity, &history, &ScoringRubric::default_crm(), Utc::now());
        assert_eq!(score.value, 30.0);
        assert_eq!(score.tier, Tier::Warm);
    }

    #[test]
    fn inactivity_penalty_applies_only_while_inactive() {
        let entity = lead_with(&[
            ("source", AttrValue::Choice("webinar".into())),
            ("budget", AttrValue::Number(10_000.0)),
        ]);
        let rubric = ScoringRubric::default_crm();

        // 20 + 10 = 30, then inactivity -15.
        let inactive = vec![EventBody::InactivityDetected { days_inactive: 21 }];
        let score = compute_score(&entity, &inactive, &rubric, Utc::now());
        assert_eq!(score.value, 15.0);
        assert_eq!(score.tier, Tier::Cold);

        // Activity after the inactivity clears the penalty.
        let resumed = vec![
            EventBody::InactivityDetected { days_inactive: 21 },
            EventBody::ActivityLogged { activity: "call".into(), detail: None },
        ];
        let score = compute_score(&entity, &resumed, &rubric, Utc::now());
        assert_eq!(score.value, 30.0);
    }

    #[test]
    fn short_inactivity_below_threshold_is_ignored() {
        let entity = lead_with(&[("source", AttrValue::Choice("webinar".into()))]);
        let history = vec![EventBody::InactivityDetected { days_inactive: 7 }];
        let score = compute_score(&entity, &history, &ScoringRubric::default_crm(), Utc::now());
        assert_eq!(score.value, 20.0);
    }

    #[test]
    fn value_clamps_to_bounds() {
        let mut rubric = ScoringRubric::default_crm();
        for signal in &mut rubric.signals {
            signal.weight *= 10.0;
        }
        let entity = lead_with(&[
            ("source", AttrValue::Choice("webinar".into())),
            ("budget", AttrValue::Number(1.0)),
        ]);
        let high = compute_score(&entity, &[], &rubric, Utc::now());
        assert_eq!(high.value, 100.0);

        let bare = lead_with(&[]);
        let history = vec![EventBody::InactivityDetected { days_inactive: 30 }];
        let low = compute_score(&bare, &history, &rubric, Utc::now());
        assert_eq!(low.value, 0.0);
    }

    #[test]
    fn same_inputs_same_score() {
        let entity = lead_with(&[("source", AttrValue::Choice("webinar".into()))]);
        let history = vec![EventBody::ActivityLogged { activity: "email_open".into(), detail: None }];
        let rubric = ScoringRubric::default_crm();
        let at = Utc::now();
        let a = compute_score(&entity, &history, &rubric, at);
        let b = compute_score(&entity, &history, &rubric, at);
        assert_eq!(a.value, b.value);
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.contributions, b.contributions);
        assert_eq!(a.rubric_version, b.rubric_version);
    }

    #[test]
    fn missing_signal_inputs_contribute_zero() {
        let entity = lead_with(&[]);
        let score = compute_score(&entity, &[], &ScoringRubric::default_crm(), Utc::now());
        assert_eq!(score.value, 0.0);
        assert!(score.contributions.is_empty());
    }
}
