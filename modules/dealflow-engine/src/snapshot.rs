//! Immutable configuration snapshots.
//!
//! Rules, rubric and pipeline are read-mostly configuration shared across
//! all lanes. Updates arrive as a whole new snapshot swapped atomically —
//! never in-place mutation — so an in-flight evaluation sees one consistent
//! version from start to finish.

use std::sync::{Arc, RwLock};

use dealflow_common::rules::Rule;
use dealflow_common::score::ScoringRubric;
use dealflow_common::stage::PipelineConfig;
use tracing::info;

/// One consistent version of the engine's configuration.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u32,
    pub rules: Vec<Rule>,
    pub rubric: ScoringRubric,
    pub pipeline: PipelineConfig,
}

impl ConfigSnapshot {
    /// Defaults from the original CRM product, with no rules.
    pub fn default_crm() -> Self {
        Self {
            version: 1,
            rules: Vec::new(),
            rubric: ScoringRubric::default_crm(),
            pipeline: PipelineConfig::default_crm(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }
}

/// Shared handle to the current snapshot. Lanes `load()` once per event;
/// the rule-configuration collaborator `swap()`s in new versions.
pub struct SnapshotHandle {
    inner: RwLock<Arc<ConfigSnapshot>>,
}

impl SnapshotHandle {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot valid right now. Cheap (Arc clone); the returned
    /// reference stays consistent even if a swap happens mid-evaluation.
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.inner.read().unwrap().clone()
    }

    /// Replace the whole snapshot. In-flight evaluations keep the version
    /// they loaded; new scores are forward-only (no retroactive rescore).
    pub fn swap(&self, snapshot: ConfigSnapshot) {
        let version = snapshot.version;
        *self.inner.write().unwrap() = Arc::new(snapshot);
        info!(version, "Config snapshot swapped");
    }
}
