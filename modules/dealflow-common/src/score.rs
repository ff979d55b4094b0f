//! Lead scores and the scoring rubric.
//!
//! A score is derived, never mutated in place: every recomputation builds a
//! fresh `Score` that supersedes the previous one atomically. The rubric is
//! read-mostly configuration, versioned so a score records which rubric
//! produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AttrValue;

// --- Tier ---

/// Categorical bucket for a lead-quality score, coldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cold,
    Warm,
    Hot,
    Qualified,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Cold => "cold",
            Tier::Warm => "warm",
            Tier::Hot => "hot",
            Tier::Qualified => "qualified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cold" => Some(Tier::Cold),
            "warm" => Some(Tier::Warm),
            "hot" => Some(Tier::Hot),
            "qualified" => Some(Tier::Qualified),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Score thresholds for tier assignment, checked in descending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub qualified: f64,
    pub hot: f64,
    pub warm: f64,
}

impl TierThresholds {
    pub fn tier_for(&self, value: f64) -> Tier {
        if value >= self.qualified {
            Tier::Qualified
        } else if value >= self.hot {
            Tier::Hot
        } else if value >= self.warm {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            qualified: 80.0,
            hot: 60.0,
            warm: 30.0,
        }
    }
}

// --- Signals ---

/// What a rubric signal matches against. Missing inputs contribute zero,
/// never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalKind {
    /// The attribute exists with any value.
    AttributePresent { field: String },
    /// The attribute exists and equals the given value.
    AttributeEquals { field: String, value: AttrValue },
    /// Weight applied once per matching logged activity in the history.
    ActivityLogged { activity: String },
    /// The entity's most recent activity-related event is an inactivity
    /// detection of at least this many days.
    InactivityExceeds { days: u32 },
}

/// One weighted signal in the rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRule {
    pub id: String,
    #[serde(flatten)]
    pub kind: SignalKind,
    pub weight: f64,
}

/// The versioned scoring rubric: weighted signals plus tier thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringRubric {
    pub version: u32,
    pub signals: Vec<SignalRule>,
    pub thresholds: TierThresholds,
}

impl ScoringRubric {
    /// The rubric the original CRM product ships with.
    pub fn default_crm() -> Self {
        Self {
            version: 1,
            signals: vec![
                SignalRule {
                    id: "source_webinar".into(),
                    kind: SignalKind::AttributeEquals {
                        field: "source".into(),
                        value: AttrValue::Choice("webinar".into()),
                    },
                    weight: 20.0,
                },
                SignalRule {
                    id: "budget_present".into(),
                    kind: SignalKind::AttributePresent {
                        field: "budget".into(),
                    },
                    weight: 10.0,
                },
                SignalRule {
                    id: "email_open".into(),
                    kind: SignalKind::ActivityLogged {
                        activity: "email_open".into(),
                    },
                    weight: 5.0,
                },
                SignalRule {
                    id: "inactive_14d".into(),
                    kind: SignalKind::InactivityExceeds { days: 14 },
                    weight: -15.0,
                },
            ],
            thresholds: TierThresholds::default(),
        }
    }
}

// --- Score ---

/// Weight actually applied for one signal during a recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContribution {
    pub signal_id: String,
    pub weight: f64,
}

/// A derived lead-quality score. Value is clamped to [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub tier: Tier,
    pub contributions: Vec<SignalContribution>,
    pub rubric_version: u32,
    pub computed_at: DateTime<Utc>,
}
