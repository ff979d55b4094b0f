//! Pipeline stages and transition history.
//!
//! Stage sequences are configuration, not code: a pipeline is an ordered
//! list of named stages plus two terminal absorbing stages (won / lost).
//! A deal owns its current stage and an append-only transition history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stage name within a configured pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(s: impl Into<String>) -> Self {
        StageId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        StageId(s.to_string())
    }
}

/// One stage in the ordered sequence. `probability` is the win likelihood
/// (0–100) used for weighted deal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub id: StageId,
    pub probability: u8,
}

impl StageDef {
    pub fn new(id: impl Into<String>, probability: u8) -> Self {
        Self {
            id: StageId::new(id),
            probability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Won,
    Lost,
}

/// A deal pipeline: ordered working stages, then the two terminals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageDef>,
    pub closed_won: StageDef,
    pub closed_lost: StageDef,
    /// When false, a forward move must advance exactly one stage.
    pub allow_skip: bool,
}

impl PipelineConfig {
    /// The pipeline the original CRM product ships with.
    pub fn default_crm() -> Self {
        Self {
            stages: vec![
                StageDef::new("prospecting", 10),
                StageDef::new("qualified", 25),
                StageDef::new("proposal", 50),
                StageDef::new("negotiation", 75),
            ],
            closed_won: StageDef::new("closed_won", 100),
            closed_lost: StageDef::new("closed_lost", 0),
            allow_skip: false,
        }
    }

    /// Index of a working (non-terminal) stage, if present.
    pub fn index_of(&self, stage: &StageId) -> Option<usize> {
        self.stages.iter().position(|s| &s.id == stage)
    }

    pub fn is_terminal(&self, stage: &StageId) -> bool {
        self.terminal_outcome(stage).is_some()
    }

    pub fn terminal_outcome(&self, stage: &StageId) -> Option<TerminalOutcome> {
        if stage == &self.closed_won.id {
            Some(TerminalOutcome::Won)
        } else if stage == &self.closed_lost.id {
            Some(TerminalOutcome::Lost)
        } else {
            None
        }
    }

    /// Whether the stage exists anywhere in this pipeline.
    pub fn contains(&self, stage: &StageId) -> bool {
        self.index_of(stage).is_some() || self.is_terminal(stage)
    }

    pub fn probability(&self, stage: &StageId) -> Option<u8> {
        if stage == &self.closed_won.id {
            return Some(self.closed_won.probability);
        }
        if stage == &self.closed_lost.id {
            return Some(self.closed_lost.probability);
        }
        self.stages
            .iter()
            .find(|s| &s.id == stage)
            .map(|s| s.probability)
    }

    /// Where new deals enter the pipeline.
    pub fn first_stage(&self) -> &StageId {
        &self.stages[0].id
    }

    /// Deal value weighted by the current stage's win probability.
    pub fn weighted_value(&self, stage: &StageId, value: f64) -> Option<f64> {
        self.probability(stage)
            .map(|p| value * f64::from(p) / 100.0)
    }
}

/// One recorded stage move. History is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: StageId,
    pub to: StageId,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A deal's pipeline position: current stage plus full transition history.
/// Current stage and history are only ever updated together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub current: StageId,
    pub history: Vec<Transition>,
}

impl PipelineState {
    pub fn new(initial: StageId) -> Self {
        Self {
            current: initial,
            history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_orders_stages() {
        let config = PipelineConfig::default_crm();
        assert_eq!(config.index_of(&"prospecting".into()), Some(0));
        assert_eq!(config.index_of(&"negotiation".into()), Some(3));
        assert_eq!(config.index_of(&"closed_won".into()), None);
        assert!(config.is_terminal(&"closed_won".into()));
        assert!(config.is_terminal(&"closed_lost".into()));
        assert_eq!(
            config.terminal_outcome(&"closed_lost".into()),
            Some(TerminalOutcome::Lost)
        );
    }

    #[test]
    fn weighted_value_uses_stage_probability() {
        let config = PipelineConfig::default_crm();
        assert_eq!(
            config.weighted_value(&"proposal".into(), 10_000.0),
            Some(5_000.0)
        );
        assert_eq!(
            config.weighted_value(&"closed_lost".into(), 10_000.0),
            Some(0.0)
        );
        assert_eq!(config.weighted_value(&"unknown".into(), 10_000.0), None);
    }

    #[test]
    fn stage_id_serializes_transparently() {
        let json = serde_json::to_value(StageId::new("proposal")).unwrap();
        assert_eq!(json, serde_json::json!("proposal"));
    }
}
