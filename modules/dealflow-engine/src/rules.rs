//! Rule evaluation — trigger filter, condition interpreter, firing ledger.
//!
//! Evaluation is read-only over rule definitions and entity state. Each
//! rule is isolated: a condition that fails to evaluate is logged and
//! skipped, siblings continue. The firing ledger suppresses re-firing for
//! the same entity within a rule's configured window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dealflow_common::error::EngineError;
use dealflow_common::events::Event;
use dealflow_common::rules::{ActionIntent, CmpOp, Condition, FieldRef, Rule};
use dealflow_common::score::{Score, Tier};
use dealflow_common::stage::PipelineState;
use dealflow_common::types::{AttrValue, Entity};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Firing ledger
// ---------------------------------------------------------------------------

/// Remembers which (rule, entity, window-bucket) combinations have fired.
/// Firing the same rule for the same entity twice inside its window yields
/// no second intent — and no error.
#[derive(Default)]
pub struct FiringLedger {
    fired: HashMap<String, DateTime<Utc>>,
}

impl FiringLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the key was unseen (and is now recorded).
    fn check_and_record(&mut self, key: &str, at: DateTime<Utc>) -> bool {
        if self.fired.contains_key(key) {
            return false;
        }
        self.fired.insert(key.to_string(), at);
        true
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Everything a condition can read. Score and stage are the post-update
/// values for the current processing cycle.
pub struct EvalContext<'a> {
    pub entity: &'a Entity,
    pub score: Option<&'a Score>,
    pub stage: Option<&'a PipelineState>,
}

/// Result of evaluating the rule set against one event.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Intents in rule-priority order.
    pub intents: Vec<ActionIntent>,
    /// Per-rule evaluation failures (isolated, non-fatal).
    pub errors: Vec<EngineError>,
}

/// Evaluate all rules against an event and the current entity snapshot.
///
/// Matching rules run in priority order (ties break on rule id). A rule
/// whose condition holds and whose firing window is clear materializes its
/// actions into intents stamped with the dedup key.
pub fn evaluate(
    event: &Event,
    ctx: &EvalContext<'_>,
    rules: &[Rule],
    ledger: &mut FiringLedger,
) -> Evaluation {
    let mut matching: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.matches_trigger(event.body.kind()))
        .collect();
    matching.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

    let mut evaluation = Evaluation::default();

    for rule in matching {
        let holds = match eval_condition(&rule.condition, ctx) {
            Ok(holds) => holds,
            Err(message) => {
                warn!(rule_id = %rule.id, entity_id = %event.entity_id, %message, "Rule evaluation failed");
                evaluation.errors.push(EngineError::RuleEvaluation {
                    rule_id: rule.id.clone(),
                    message,
                });
                continue;
            }
        };

        if !holds {
            continue;
        }

        let firing_key = rule.firing_key(event.entity_id, event.ts);
        if !ledger.check_and_record(&firing_key, event.ts) {
            debug!(rule_id = %rule.id, entity_id = %event.entity_id, "Rule suppressed by firing window");
            continue;
        }

        for (i, action) in rule.actions.iter().enumerate() {
            evaluation.intents.push(ActionIntent {
                action: action.clone(),
                entity_id: event.entity_id,
                rule_id: rule.id.clone(),
                dedup_key: format!("{firing_key}#{i}"),
                created_at: event.ts,
            });
        }
    }

    evaluation
}

/// Pure interpreter for the condition tree. Type mismatches and unresolved
/// comparisons are errors (isolated per rule); absent fields compared with
/// `Present` are simply false.
fn eval_condition(cond: &Condition, ctx: &EvalContext<'_>) -> Result<bool, String> {
    match cond {
        Condition::Always => Ok(true),

        Condition::Present { field } => Ok(resolve(field, ctx).is_some()),

        Condition::Cmp { field, cmp, value } => {
            let actual = resolve(field, ctx)
                .ok_or_else(|| format!("field {field:?} is not set for this entity"))?;
            compare(&actual, *cmp, value, field)
        }

        Condition::All { conds } => {
            for c in conds {
                if !eval_condition(c, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Condition::Any { conds } => {
            for c in conds {
                if eval_condition(c, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }

        Condition::Not { cond } => Ok(!eval_condition(cond, ctx)?),
    }
}

/// Resolve a field reference to a concrete value.
fn resolve(field: &FieldRef, ctx: &EvalContext<'_>) -> Option<AttrValue> {
    match field {
        FieldRef::Attr { name } => ctx.entity.attr(name).cloned(),
        FieldRef::Score => ctx.score.map(|s| AttrValue::Number(s.value)),
        FieldRef::Tier => ctx.score.map(|s| AttrValue::Choice(s.tier.as_str().to_string())),
        FieldRef::Stage => ctx
            .stage
            .map(|p| AttrValue::Choice(p.current.as_str().to_string())),
    }
}

fn compare(
    actual: &AttrValue,
    cmp: CmpOp,
    expected: &AttrValue,
    field: &FieldRef,
) -> Result<bool, String> {
    // Tier comparisons are ordinal, not lexical.
    if matches!(field, FieldRef::Tier) {
        return compare_tiers(actual, cmp, expected);
    }

    match (actual, expected) {
        (AttrValue::Number(a), AttrValue::Number(b)) => Ok(compare_ord(
            a.partial_cmp(b)
                .ok_or_else(|| "NaN is not comparable".to_string())?,
            cmp,
        )?),
        (AttrValue::Timestamp(a), AttrValue::Timestamp(b)) => Ok(compare_ord(a.cmp(b), cmp)?),
        (AttrValue::Bool(a), AttrValue::Bool(b)) => match cmp {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(format!("operator {cmp:?} is not defined for booleans")),
        },
        (a, b) => {
            let (Some(a), Some(b)) = (a.as_text(), b.as_text()) else {
                return Err(format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ));
            };
            match cmp {
                CmpOp::Eq => Ok(a == b),
                CmpOp::Ne => Ok(a != b),
                CmpOp::Contains => Ok(a.contains(b)),
                _ => Err(format!("operator {cmp:?} is not defined for text")),
            }
        }
    }
}

fn compare_tiers(actual: &AttrValue, cmp: CmpOp, expected: &AttrValue) -> Result<bool, String> {
    let parse = |v: &AttrValue| {
        v.as_text()
            .and_then(Tier::parse)
            .ok_or_else(|| format!("{v:?} is not a tier"))
    };
    let (a, b) = (parse(actual)?, parse(expected)?);
    compare_ord(a.cmp(&b), cmp)
}

fn compare_ord(ordering: std::cmp::Ordering, cmp: CmpOp) -> Result<bool, String> {
    use std::cmp::Ordering::*;
    Ok(match cmp {
        CmpOp::Eq => ordering == Equal,
        CmpOp::Ne => ordering != Equal,
        CmpOp::Gt => ordering == Greater,
        CmpOp::Gte => ordering != Less,
        CmpOp::Lt => ordering == Less,
        CmpOp::Lte => ordering != Greater,
        CmpOp::Contains => return Err("contains is only defined for text".to_string()),
    })
}
