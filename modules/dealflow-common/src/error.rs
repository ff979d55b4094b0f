use thiserror::Error;

use crate::stage::StageId;
use crate::types::EntityId;

/// Engine error taxonomy.
///
/// Propagation policy: errors local to one rule or one dispatch never halt
/// processing of other rules, intents, or entities. `SequenceGap` degrades
/// only the affected entity lane. Nothing is swallowed without a trace.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed event; rejected at ingress, never enters processing.
    #[error("validation error: {0}")]
    Validation(String),

    /// Ordering violation beyond the reorder horizon. The lane is degraded
    /// until manually resynced.
    #[error("sequence gap for entity {entity_id}: expected {expected}, got {got}")]
    SequenceGap {
        entity_id: EntityId,
        expected: u64,
        got: u64,
    },

    /// Optimistic concurrency conflict: the caller's from-stage is stale.
    /// Re-read and retry.
    #[error("stale stage state: expected {expected}, actual {actual}")]
    StaleState { expected: StageId, actual: StageId },

    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: StageId, to: StageId },

    /// Terminal stages are absorbing — no further transitions.
    #[error("stage {0} is terminal")]
    TerminalState(StageId),

    /// Isolated per rule; siblings and committed state are unaffected.
    #[error("rule {rule_id} evaluation failed: {message}")]
    RuleEvaluation { rule_id: String, message: String },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("not found")]
    NotFound,

    /// The entity's lane saw a sequence gap and rejects input until resync.
    #[error("lane for entity {0} is degraded")]
    LaneDegraded(EntityId),

    #[error("ingress queue is full")]
    QueueFull,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
