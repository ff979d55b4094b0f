//! Automation rule definitions and action intents.
//!
//! A rule is trigger kinds + a condition expression tree + an ordered action
//! list. Conditions are data, not code: a small tagged-variant tree over
//! attribute references, score, tier and stage, evaluated by a pure
//! interpreter in the engine crate. The engine never mutates rule
//! definitions — authoring is an external collaborator concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventKind;
use crate::stage::StageId;
use crate::types::{AttrValue, EntityId};

// --- Condition language ---

/// What a condition term reads from the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ref", rename_all = "snake_case")]
pub enum FieldRef {
    /// An entity attribute by name.
    Attr { name: String },
    /// The current score value (number).
    Score,
    /// The current tier (compares by tier rank).
    Tier,
    /// The deal's current pipeline stage (compares by name).
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring match on text values.
    Contains,
}

/// A boolean expression over the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a field against a literal.
    Cmp {
        field: FieldRef,
        cmp: CmpOp,
        value: AttrValue,
    },
    /// The field resolves to a value at all.
    Present { field: FieldRef },
    /// All children true (true when empty).
    All { conds: Vec<Condition> },
    /// At least one child true (false when empty).
    Any { conds: Vec<Condition> },
    Not { cond: Box<Condition> },
    /// Matches unconditionally.
    Always,
}

// --- Actions ---

/// A side effect requested by a rule. The engine only materializes these
/// into intents; execution belongs to the dispatcher gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    SendEmail {
        template: String,
    },
    SendSms {
        message: String,
    },
    CreateTask {
        title: String,
        due_in_days: u32,
    },
    NotifyUser {
        user: String,
        message: String,
    },
    MoveStage {
        to: StageId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Action {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Action::SendEmail { .. } => "send_email",
            Action::SendSms { .. } => "send_sms",
            Action::CreateTask { .. } => "create_task",
            Action::NotifyUser { .. } => "notify_user",
            Action::MoveStage { .. } => "move_stage",
        }
    }
}

// --- Firing window ---

/// How long a rule stays suppressed for an entity after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "window", rename_all = "snake_case")]
pub enum FiringWindow {
    /// Once per UTC calendar day (the default).
    CalendarDay,
    /// Once per fixed-size bucket of this many hours.
    Hours { hours: u32 },
}

impl Default for FiringWindow {
    fn default() -> Self {
        FiringWindow::CalendarDay
    }
}

impl FiringWindow {
    /// The bucket label for a timestamp. Same bucket → suppressed.
    pub fn bucket(&self, ts: DateTime<Utc>) -> String {
        match self {
            FiringWindow::CalendarDay => ts.format("%Y-%m-%d").to_string(),
            FiringWindow::Hours { hours } => {
                let bucket = ts.timestamp() / (i64::from(*hours) * 3600);
                format!("h{bucket}")
            }
        }
    }
}

// --- Rule ---

/// A user-defined automation rule. Lower priority fires first; ties break
/// on rule id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub enabled: bool,
    pub triggers: Vec<EventKind>,
    pub condition: Condition,
    pub actions: Vec<Action>,
    pub priority: i32,
    #[serde(default)]
    pub window: FiringWindow,
}

impl Rule {
    pub fn matches_trigger(&self, kind: EventKind) -> bool {
        self.enabled && self.triggers.contains(&kind)
    }

    /// Suppression key for one firing of this rule against an entity.
    pub fn firing_key(&self, entity_id: EntityId, ts: DateTime<Utc>) -> String {
        format!("{}:{}:{}", self.id, entity_id, self.window.bucket(ts))
    }
}

// --- Action intents ---

/// A requested side effect, emitted by the rule engine and consumed exactly
/// once by the dispatcher gateway. Delivery is at-least-once; `dedup_key`
/// enables at-most-once effective execution downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionIntent {
    pub action: Action,
    pub entity_id: EntityId,
    pub rule_id: String,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn calendar_day_buckets_by_utc_date() {
        let w = FiringWindow::CalendarDay;
        let morning = Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 3, 14, 22, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 0, 30, 0).unwrap();
        assert_eq!(w.bucket(morning), w.bucket(evening));
        assert_ne!(w.bucket(morning), w.bucket(next_day));
    }

    #[test]
    fn hour_window_buckets_roll_over() {
        let w = FiringWindow::Hours { hours: 6 };
        let t0 = Utc.with_ymd_and_hms(2026, 3, 14, 1, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 14, 5, 59, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 14, 6, 1, 0).unwrap();
        assert_eq!(w.bucket(t0), w.bucket(t1));
        assert_ne!(w.bucket(t1), w.bucket(t2));
    }

    #[test]
    fn condition_tree_roundtrips_through_json() {
        let cond = Condition::All {
            conds: vec![
                Condition::Cmp {
                    field: FieldRef::Score,
                    cmp: CmpOp::Gte,
                    value: AttrValue::Number(20.0),
                },
                Condition::Cmp {
                    field: FieldRef::Attr { name: "source".into() },
                    cmp: CmpOp::Eq,
                    value: AttrValue::Choice("webinar".into()),
                },
            ],
        };
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["op"], "all");
        let back: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn disabled_rules_never_match() {
        let rule = Rule {
            id: "r1".into(),
            enabled: false,
            triggers: vec![EventKind::ActivityLogged],
            condition: Condition::Always,
            actions: vec![],
            priority: 0,
            window: FiringWindow::CalendarDay,
        };
        assert!(!rule.matches_trigger(EventKind::ActivityLogged));
    }
}
