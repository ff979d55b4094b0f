//! The orchestrator — ingress, per-entity lanes, and the processing cycle.
//!
//! Each entity maps to one lane (a dedicated task with a bounded queue), so
//! all processing for an entity happens in strict seq order while distinct
//! entities process concurrently. One event flows persist → score →
//! pipeline → rules; emitted intents go to the dispatch pool and never
//! block the lane.
//!
//! A component failure for one event never blocks another entity's stream:
//! rejected transitions and rule errors are recorded and the lane moves on;
//! only a sequence gap past the reorder horizon degrades a lane, and only
//! that lane.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use dealflow_common::config::EngineConfig;
use dealflow_common::error::EngineError;
use dealflow_common::events::{normalize, Event, EventBody, EventKind, RawEvent};
use dealflow_common::score::Score;
use dealflow_common::stage::{PipelineState, Transition};
use dealflow_common::types::{Entity, EntityId, EntityKind};
use dealflow_events::{EventLog, StoredEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{DeadLetter, DispatchPool};
use crate::lane::{LaneAccept, LaneSequencer};
use crate::pipeline::{request_transition, stage_moved_body, TransitionRequest};
use crate::rules::{evaluate, EvalContext, FiringLedger};
use crate::scoring::compute_score;
use crate::snapshot::{ConfigSnapshot, SnapshotHandle};
use crate::traits::Dispatcher;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the engine tracks for one entity.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub entity: Entity,
    pub score: Option<Score>,
    pub pipeline: Option<PipelineState>,
}

/// A recorded, non-fatal processing failure. Auditable: nothing is
/// swallowed without a trace.
#[derive(Debug, Clone)]
pub struct ProcessingFailure {
    pub entity_id: EntityId,
    pub seq: u64,
    pub phase: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

enum LaneMsg {
    Event(Event),
    Resync(u64),
    Flush(oneshot::Sender<()>),
}

struct LaneHandle {
    tx: mpsc::Sender<LaneMsg>,
    task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    inner: Arc<Inner>,
    lanes: Mutex<HashMap<EntityId, LaneHandle>>,
}

struct Inner {
    log: Arc<dyn EventLog>,
    snapshot: SnapshotHandle,
    dispatch: DispatchPool,
    config: EngineConfig,
    states: RwLock<HashMap<EntityId, EntityState>>,
    ledger: Mutex<FiringLedger>,
    failures: Mutex<Vec<ProcessingFailure>>,
    degraded: Mutex<HashSet<EntityId>>,
}

impl Orchestrator {
    pub fn new(
        log: Arc<dyn EventLog>,
        dispatcher: Arc<dyn Dispatcher>,
        snapshot: ConfigSnapshot,
        config: EngineConfig,
    ) -> Self {
        let dispatch = DispatchPool::spawn(dispatcher, &config);
        Self {
            inner: Arc::new(Inner {
                log,
                snapshot: SnapshotHandle::new(snapshot),
                dispatch,
                config,
                states: RwLock::new(HashMap::new()),
                ledger: Mutex::new(FiringLedger::new()),
                failures: Mutex::new(Vec::new()),
                degraded: Mutex::new(HashSet::new()),
            }),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a raw event. Validation happens here, synchronously; accepted
    /// events are queued to the entity's lane (blocking on backpressure).
    pub async fn submit(&self, raw: RawEvent) -> Result<(), EngineError> {
        let event = normalize(raw)?;
        let tx = self.lane_sender(event.entity_id);
        tx.send(LaneMsg::Event(event))
            .await
            .map_err(|_| EngineError::Other(anyhow::anyhow!("lane task terminated")))
    }

    /// Non-blocking variant of `submit`: fails with `QueueFull` instead of
    /// waiting when the lane is saturated.
    pub fn try_submit(&self, raw: RawEvent) -> Result<(), EngineError> {
        let event = normalize(raw)?;
        let tx = self.lane_sender(event.entity_id);
        tx.try_send(LaneMsg::Event(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::Other(anyhow::anyhow!("lane task terminated"))
            }
        })
    }

    fn lane_sender(&self, entity_id: EntityId) -> mpsc::Sender<LaneMsg> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes
            .entry(entity_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.inner.config.lane_capacity);
                let task = tokio::spawn(run_lane(entity_id, rx, Arc::clone(&self.inner)));
                debug!(%entity_id, "Lane created");
                LaneHandle { tx, task }
            })
            .tx
            .clone()
    }

    // --- Queries ---

    pub fn get_score(&self, entity_id: EntityId) -> Result<Score, EngineError> {
        self.inner
            .states
            .read()
            .unwrap()
            .get(&entity_id)
            .and_then(|s| s.score.clone())
            .ok_or(EngineError::NotFound)
    }

    pub fn get_stage_history(&self, entity_id: EntityId) -> Result<Vec<Transition>, EngineError> {
        self.inner
            .states
            .read()
            .unwrap()
            .get(&entity_id)
            .and_then(|s| s.pipeline.as_ref())
            .map(|p| p.history.clone())
            .ok_or(EngineError::NotFound)
    }

    pub fn get_entity(&self, entity_id: EntityId) -> Result<Entity, EngineError> {
        self.inner
            .states
            .read()
            .unwrap()
            .get(&entity_id)
            .map(|s| s.entity.clone())
            .ok_or(EngineError::NotFound)
    }

    /// Deal value weighted by the current stage's win probability. Uses the
    /// `value` attribute; absent value counts as zero.
    pub fn get_weighted_value(&self, entity_id: EntityId) -> Result<f64, EngineError> {
        let states = self.inner.states.read().unwrap();
        let state = states.get(&entity_id).ok_or(EngineError::NotFound)?;
        let pipeline = state.pipeline.as_ref().ok_or(EngineError::NotFound)?;
        let value = state
            .entity
            .attr("value")
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);
        self.inner
            .snapshot
            .load()
            .pipeline
            .weighted_value(&pipeline.current, value)
            .ok_or(EngineError::NotFound)
    }

    /// Whether an open deal's expected close date has passed. Closed deals
    /// are never overdue.
    pub fn is_deal_overdue(
        &self,
        entity_id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let states = self.inner.states.read().unwrap();
        let state = states.get(&entity_id).ok_or(EngineError::NotFound)?;
        let pipeline = state.pipeline.as_ref().ok_or(EngineError::NotFound)?;
        if self.inner.snapshot.load().pipeline.is_terminal(&pipeline.current) {
            return Ok(false);
        }
        Ok(state
            .entity
            .attr("expected_close")
            .and_then(|v| v.as_timestamp())
            .is_some_and(|t| t < now))
    }

    /// Whether the entity's lane is degraded by a sequence gap.
    pub fn is_lane_degraded(&self, entity_id: EntityId) -> bool {
        self.inner.degraded.lock().unwrap().contains(&entity_id)
    }

    /// Recorded non-fatal failures, oldest first.
    pub fn failures(&self) -> Vec<ProcessingFailure> {
        self.inner.failures.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dispatch.dead_letters()
    }

    // --- Control ---

    /// Swap in a new config snapshot. In-flight events keep the version
    /// they loaded; scoring is forward-only from here.
    pub fn swap_config(&self, snapshot: ConfigSnapshot) {
        self.inner.snapshot.swap(snapshot);
    }

    /// Operator resync for a degraded lane: resume from `next_expected`.
    pub async fn resync_lane(
        &self,
        entity_id: EntityId,
        next_expected: u64,
    ) -> Result<(), EngineError> {
        let tx = self.lane_sender(entity_id);
        tx.send(LaneMsg::Resync(next_expected))
            .await
            .map_err(|_| EngineError::Other(anyhow::anyhow!("lane task terminated")))
    }

    /// Wait until every event submitted before this call has been fully
    /// processed and its intents resolved by the dispatch pool.
    pub async fn settle(&self) {
        let senders: Vec<mpsc::Sender<LaneMsg>> = {
            let lanes = self.lanes.lock().unwrap();
            lanes.values().map(|l| l.tx.clone()).collect()
        };
        for tx in senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if tx.send(LaneMsg::Flush(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        }
        self.inner.dispatch.flush().await;
    }

    /// Drain all lanes and the dispatch pool, then stop.
    pub async fn shutdown(self) {
        let lanes: Vec<LaneHandle> = {
            let mut guard = self.lanes.lock().unwrap();
            guard.drain().map(|(_, handle)| handle).collect()
        };
        for lane in lanes {
            drop(lane.tx);
            let _ = lane.task.await;
        }
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.dispatch.shutdown().await,
            Err(inner) => inner.dispatch.flush().await,
        }
        info!("Orchestrator shut down");
    }
}

// ---------------------------------------------------------------------------
// Lane task
// ---------------------------------------------------------------------------

async fn run_lane(entity_id: EntityId, mut rx: mpsc::Receiver<LaneMsg>, inner: Arc<Inner>) {
    let next_expected = match inner.hydrate(entity_id).await {
        Ok(seq) => seq,
        Err(e) => {
            warn!(%entity_id, error = %e, "Lane hydration failed; starting fresh");
            1
        }
    };
    let mut sequencer = LaneSequencer::new(next_expected, inner.config.reorder_horizon);

    while let Some(msg) = rx.recv().await {
        match msg {
            LaneMsg::Event(event) => {
                let seq = event.seq;
                match sequencer.offer(event) {
                    LaneAccept::Ready(ready) => {
                        for event in ready {
                            inner.process_event(event).await;
                        }
                    }
                    LaneAccept::Buffered => {}
                    LaneAccept::Duplicate => {
                        debug!(%entity_id, seq, "Duplicate event ignored");
                    }
                    LaneAccept::Gap { expected, got } => {
                        inner.degraded.lock().unwrap().insert(entity_id);
                        inner.record_failure(
                            entity_id,
                            got,
                            "sequence",
                            EngineError::SequenceGap { entity_id, expected, got }.to_string(),
                        );
                    }
                    LaneAccept::Degraded => {
                        inner.record_failure(
                            entity_id,
                            seq,
                            "sequence",
                            EngineError::LaneDegraded(entity_id).to_string(),
                        );
                    }
                }
            }
            LaneMsg::Resync(next) => {
                sequencer.resync(next);
                inner.degraded.lock().unwrap().remove(&entity_id);
                info!(%entity_id, next, "Lane resynced");
            }
            LaneMsg::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Processing cycle
// ---------------------------------------------------------------------------

impl Inner {
    /// Rebuild entity state from the log if the engine has none (restart
    /// against a durable log). Returns the next expected seq for the lane.
    async fn hydrate(&self, entity_id: EntityId) -> anyhow::Result<u64> {
        let stored = self.log.read_for_entity(entity_id).await?;
        let Some(last) = stored.last() else {
            return Ok(1);
        };
        let next_expected = last.seq + 1;

        if self.states.read().unwrap().contains_key(&entity_id) {
            return Ok(next_expected);
        }

        let snapshot = self.snapshot.load();
        let mut bodies = Vec::with_capacity(stored.len());
        {
            let mut states = self.states.write().unwrap();
            for record in &stored {
                let Some(event) = event_from_stored(record) else {
                    warn!(%entity_id, seq = record.seq, "Skipping undecodable stored event");
                    continue;
                };
                bodies.push(event.body.clone());
                // Rejected transitions were already recorded when first
                // processed; replay only rebuilds the accepted state.
                let _ = apply_state(&mut states, &event, &snapshot);
            }
            // One score recomputation over the full history, not per event.
            if let Some(state) = states.get_mut(&entity_id) {
                if state.entity.kind == EntityKind::Lead {
                    let at = state.entity.updated_at;
                    state.score = Some(compute_score(&state.entity, &bodies, &snapshot.rubric, at));
                }
            }
        }
        info!(%entity_id, events = stored.len(), "Lane hydrated from log");
        Ok(next_expected)
    }

    /// The per-event cycle: persist → apply state (score, pipeline) → rules
    /// → dispatch handoff.
    async fn process_event(&self, event: Event) {
        // 1. Persist. A duplicate means this seq was already applied in a
        // previous run — skip without reprocessing.
        match self.log.append(to_stored(&event)).await {
            Ok(outcome) if outcome.is_duplicate() => {
                debug!(entity_id = %event.entity_id, seq = event.seq, "Already persisted; skipping");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.record_failure(event.entity_id, event.seq, "persist", e.to_string());
                return;
            }
        }

        let snapshot = self.snapshot.load();

        // 2. History for scoring — read before taking the state lock.
        let bodies = if event.entity_kind == EntityKind::Lead {
            match self.log.read_for_entity(event.entity_id).await {
                Ok(stored) => stored
                    .iter()
                    .filter_map(|r| EventBody::from_payload(&r.payload).ok())
                    .collect(),
                Err(e) => {
                    self.record_failure(event.entity_id, event.seq, "persist", e.to_string());
                    return;
                }
            }
        } else {
            Vec::new()
        };

        // 3. Apply state: attribute mutation, score recomputation, stage
        // transition. The write lock spans one entity's update only.
        let (synthetic, ctx_entity, ctx_score, ctx_pipeline) = {
            let mut states = self.states.write().unwrap();
            let synthetic = apply_state(&mut states, &event, &snapshot);

            if let Some(state) = states.get_mut(&event.entity_id) {
                if state.entity.kind == EntityKind::Lead && recomputes_score(event.body.kind()) {
                    state.score =
                        Some(compute_score(&state.entity, &bodies, &snapshot.rubric, event.ts));
                }
            }

            match states.get(&event.entity_id) {
                Some(state) => (
                    synthetic,
                    state.entity.clone(),
                    state.score.clone(),
                    state.pipeline.clone(),
                ),
                None => return,
            }
        };

        if let Some(err) = synthetic.as_ref().err() {
            self.record_failure(event.entity_id, event.seq, "pipeline", err.clone());
        }

        // 4. Rule phase, within the per-event budget. Committed score/stage
        // changes above are not rolled back on timeout.
        let ctx = EvalContext {
            entity: &ctx_entity,
            score: ctx_score.as_ref(),
            stage: ctx_pipeline.as_ref(),
        };

        let rule_phase = async {
            let mut intents = Vec::new();
            let mut errors = Vec::new();
            {
                let mut ledger = self.ledger.lock().unwrap();
                let mut evaluation = evaluate(&event, &ctx, &snapshot.rules, &mut ledger);
                intents.append(&mut evaluation.intents);
                errors.append(&mut evaluation.errors);

                // Chain rules off the synthetic StageMoved in the same cycle.
                if let Ok(Some(moved)) = &synthetic {
                    let mut chained = evaluate(moved, &ctx, &snapshot.rules, &mut ledger);
                    intents.append(&mut chained.intents);
                    errors.append(&mut chained.errors);
                }
            }
            (intents, errors)
        };

        let (intents, errors) =
            match tokio::time::timeout(self.config.rule_timeout, rule_phase).await {
                Ok(result) => result,
                Err(_) => {
                    self.record_failure(
                        event.entity_id,
                        event.seq,
                        "rules",
                        "rule phase exceeded its processing budget".to_string(),
                    );
                    return;
                }
            };

        for err in errors {
            self.record_failure(event.entity_id, event.seq, "rules", err.to_string());
        }

        // 5. Hand intents to the dispatch pool, in rule-priority order.
        for intent in intents {
            self.dispatch.submit(intent).await;
        }
    }

    fn record_failure(&self, entity_id: EntityId, seq: u64, phase: &'static str, message: String) {
        warn!(%entity_id, seq, phase, %message, "Processing failure recorded");
        self.failures.lock().unwrap().push(ProcessingFailure {
            entity_id,
            seq,
            phase,
            message,
            at: Utc::now(),
        });
    }
}

/// Whether this event kind triggers a lead score recomputation.
fn recomputes_score(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::EntityCreated
            | EventKind::FieldUpdated
            | EventKind::ActivityLogged
            | EventKind::InactivityDetected
    )
}

/// Apply an event's state mutation. Returns the synthetic `StageMoved`
/// event for a successful transition, the rejection message for a refused
/// one, and `Ok(None)` otherwise.
fn apply_state(
    states: &mut HashMap<EntityId, EntityState>,
    event: &Event,
    snapshot: &ConfigSnapshot,
) -> Result<Option<Event>, String> {
    let state = states.entry(event.entity_id).or_insert_with(|| {
        let entity = Entity::new(
            event.entity_id,
            event.entity_kind,
            Default::default(),
            event.ts,
        );
        let pipeline = (event.entity_kind == EntityKind::Deal)
            .then(|| PipelineState::new(snapshot.pipeline.first_stage().clone()));
        EntityState { entity, score: None, pipeline }
    });

    match &event.body {
        EventBody::EntityCreated { attrs } => {
            state.entity.attrs = attrs.clone();
            state.entity.created_at = event.ts;
            state.entity.updated_at = event.ts;
            Ok(None)
        }

        EventBody::FieldUpdated { field, new, .. } => {
            state.entity.apply_field_update(field, new.clone(), event.ts);
            Ok(None)
        }

        EventBody::ActivityLogged { .. } | EventBody::InactivityDetected { .. } => {
            state.entity.touch(event.ts);
            Ok(None)
        }

        EventBody::StageMoveRequested { from, to, reason } => {
            let pipeline = state
                .pipeline
                .get_or_insert_with(|| PipelineState::new(snapshot.pipeline.first_stage().clone()));
            let reopen = matches!(reason.as_deref(), Some("reopen" | "reopened"));
            let request = TransitionRequest {
                from,
                to,
                actor: event.actor.as_deref(),
                reason: reason.as_deref(),
                reopen,
            };
            match request_transition(pipeline, &snapshot.pipeline, request, event.ts) {
                Ok(transition) => {
                    state.entity.touch(event.ts);
                    Ok(Some(Event {
                        entity_id: event.entity_id,
                        entity_kind: event.entity_kind,
                        seq: event.seq,
                        ts: event.ts,
                        actor: event.actor.clone(),
                        body: stage_moved_body(&transition),
                    }))
                }
                Err(e) => Err(e.to_string()),
            }
        }

        // Synthetic events never re-enter state application.
        EventBody::StageMoved { .. } => Ok(None),
    }
}

fn to_stored(event: &Event) -> StoredEvent {
    StoredEvent {
        entity_id: event.entity_id,
        entity_kind: event.entity_kind.to_string(),
        seq: event.seq,
        ts: event.ts,
        event_type: event.body.event_type().to_string(),
        actor: event.actor.clone(),
        payload: event.body.to_payload(),
    }
}

fn event_from_stored(record: &StoredEvent) -> Option<Event> {
    Some(Event {
        entity_id: record.entity_id,
        entity_kind: EntityKind::parse(&record.entity_kind)?,
        seq: record.seq,
        ts: record.ts,
        actor: record.actor.clone(),
        body: EventBody::from_payload(&record.payload).ok()?,
    })
}
