//! Deal pipeline state machine.
//!
//! Transitions are forward-only by default; an authorized reopen steps back
//! exactly one stage. Terminal stages absorb. The optimistic from-stage
//! check makes concurrent movers safe: a stale request fails, the caller
//! re-reads and retries.

use chrono::{DateTime, Utc};
use dealflow_common::error::EngineError;
use dealflow_common::events::EventBody;
use dealflow_common::stage::{PipelineConfig, PipelineState, StageId, Transition};
use tracing::info;

/// A validated stage-move request.
#[derive(Debug, Clone)]
pub struct TransitionRequest<'a> {
    pub from: &'a StageId,
    pub to: &'a StageId,
    pub actor: Option<&'a str>,
    pub reason: Option<&'a str>,
    /// Authorizes a single-step backward move, recorded as "reopened".
    pub reopen: bool,
}

/// Apply a stage move. On success the transition is appended to history and
/// the current stage updated in one mutation — no partial state observable.
/// Returns the recorded transition; the caller feeds the matching synthetic
/// `StageMoved` event back into the rule engine.
pub fn request_transition(
    state: &mut PipelineState,
    config: &PipelineConfig,
    request: TransitionRequest<'_>,
    at: DateTime<Utc>,
) -> Result<Transition, EngineError> {
    if config.is_terminal(&state.current) {
        return Err(EngineError::TerminalState(state.current.clone()));
    }

    if request.from != &state.current {
        return Err(EngineError::StaleState {
            expected: request.from.clone(),
            actual: state.current.clone(),
        });
    }

    if !config.contains(request.to) {
        return Err(EngineError::InvalidTransition {
            from: request.from.clone(),
            to: request.to.clone(),
        });
    }

    let reason = validate_direction(config, &request)?;

    let transition = Transition {
        from: request.from.clone(),
        to: request.to.clone(),
        at,
        actor: request.actor.map(str::to_string),
        reason,
    };

    state.history.push(transition.clone());
    state.current = request.to.clone();

    info!(
        from = %transition.from,
        to = %transition.to,
        actor = transition.actor.as_deref().unwrap_or("-"),
        "Stage transition applied"
    );

    Ok(transition)
}

/// Direction rules: terminal moves are allowed from any working stage;
/// forward moves advance one stage (or skip when configured); backward
/// moves need reopen authorization and step back exactly one.
fn validate_direction(
    config: &PipelineConfig,
    request: &TransitionRequest<'_>,
) -> Result<Option<String>, EngineError> {
    let invalid = || EngineError::InvalidTransition {
        from: request.from.clone(),
        to: request.to.clone(),
    };

    if config.is_terminal(request.to) {
        return Ok(request.reason.map(str::to_string));
    }

    // Both stages are working stages past this point; from was validated as
    // the current (non-terminal) stage already.
    let from_idx = config.index_of(request.from).ok_or_else(invalid)?;
    let to_idx = config.index_of(request.to).ok_or_else(invalid)?;

    if to_idx == from_idx {
        return Err(invalid());
    }

    if to_idx > from_idx {
        if to_idx > from_idx + 1 && !config.allow_skip {
            return Err(invalid());
        }
        return Ok(request.reason.map(str::to_string));
    }

    // Backward: only a single-step authorized reopen.
    if !request.reopen || to_idx + 1 != from_idx {
        return Err(invalid());
    }
    Ok(Some("reopened".to_string()))
}

/// The synthetic event mirroring a recorded transition.
pub fn stage_moved_body(transition: &Transition) -> EventBody {
    EventBody::StageMoved {
        from: transition.from.clone(),
        to: transition.to.clone(),
        reason: transition.reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(from: &'a StageId, to: &'a StageId) -> TransitionRequest<'a> {
        TransitionRequest {
            from,
            to,
            actor: Some("rep-1"),
            reason: None,
            reopen: false,
        }
    }

    fn state_at(stage: &str) -> PipelineState {
        PipelineState::new(stage.into())
    }

    #[test]
    fn forward_single_step_succeeds_and_records_history() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("proposal");
        let (from, to) = ("proposal".into(), "negotiation".into());

        let transition =
            request_transition(&mut state, &config, request(&from, &to), Utc::now()).unwrap();

        assert_eq!(state.current, to);
        assert_eq!(state.history.len(), 1);
        assert_eq!(transition.from, from);
        assert_eq!(transition.actor.as_deref(), Some("rep-1"));
    }

    #[test]
    fn stale_from_stage_fails_without_state_change() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("negotiation");
        let (stale_from, to) = ("proposal".into(), "negotiation".into());

        let err = request_transition(&mut state, &config, request(&stale_from, &to), Utc::now());
        assert!(matches!(err, Err(EngineError::StaleState { .. })));
        assert!(state.history.is_empty());
        assert_eq!(state.current, StageId::new("negotiation"));
    }

    #[test]
    fn terminal_stage_absorbs() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("closed_lost");
        let (from, to) = ("closed_lost".into(), "prospecting".into());

        let err = request_transition(&mut state, &config, request(&from, &to), Utc::now());
        assert!(matches!(err, Err(EngineError::TerminalState(_))));
        assert!(state.history.is_empty());
    }

    #[test]
    fn skip_requires_configuration() {
        let mut config = PipelineConfig::default_crm();
        let mut state = state_at("prospecting");
        let (from, to) = ("prospecting".into(), "proposal".into());

        let err = request_transition(&mut state, &config, request(&from, &to), Utc::now());
        assert!(matches!(err, Err(EngineError::InvalidTransition { .. })));

        config.allow_skip = true;
        request_transition(&mut state, &config, request(&from, &to), Utc::now()).unwrap();
        assert_eq!(state.current, to);
    }

    #[test]
    fn close_is_reachable_from_any_working_stage() {
        let config = PipelineConfig::default_crm();
        for stage in ["prospecting", "qualified", "proposal", "negotiation"] {
            let mut state = state_at(stage);
            let from: StageId = stage.into();
            let to: StageId = "closed_lost".into();
            let mut req = request(&from, &to);
            req.reason = Some("price");
            let transition = request_transition(&mut state, &config, req, Utc::now()).unwrap();
            assert_eq!(transition.reason.as_deref(), Some("price"));
        }
    }

    #[test]
    fn reopen_steps_back_exactly_one_stage() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("negotiation");
        let (from, to) = ("negotiation".into(), "proposal".into());

        // Unauthorized backward move fails.
        let err = request_transition(&mut state, &config, request(&from, &to), Utc::now());
        assert!(matches!(err, Err(EngineError::InvalidTransition { .. })));

        // Authorized reopen records the canonical reason.
        let mut req = request(&from, &to);
        req.reopen = true;
        let transition = request_transition(&mut state, &config, req, Utc::now()).unwrap();
        assert_eq!(transition.reason.as_deref(), Some("reopened"));

        // Two stages back is never allowed, reopen or not.
        let (from, to) = ("proposal".into(), "prospecting".into());
        let mut state = state_at("proposal");
        let mut req = request(&from, &to);
        req.reopen = true;
        let err = request_transition(&mut state, &config, req, Utc::now());
        assert!(matches!(err, Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn unknown_target_stage_is_invalid() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("proposal");
        let (from, to) = ("proposal".into(), "due_diligence".into());
        let err = request_transition(&mut state, &config, request(&from, &to), Utc::now());
        assert!(matches!(err, Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn history_timestamps_are_monotone() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("prospecting");
        let t0 = Utc::now();

        let stages = ["prospecting", "qualified", "proposal", "negotiation"];
        for (i, pair) in stages.windows(2).enumerate() {
            let (from, to) = (pair[0].into(), pair[1].into());
            let at = t0 + chrono::Duration::seconds(i as i64 + 1);
            request_transition(&mut state, &config, request(&from, &to), at).unwrap();
        }

        let times: Vec<_> = state.history.iter().map(|t| t.at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(state.history.len(), 3);
    }

    #[test]
    fn reopen_from_proposal_lands_on_qualified() {
        let config = PipelineConfig::default_crm();
        let mut state = state_at("proposal");
        let (from, to) = ("proposal".into(), "qualified".into());
        let mut req = request(&from, &to);
        req.reopen = true;
        request_transition(&mut state, &config, req, Utc::now()).unwrap();
        assert_eq!(state.current, StageId::new("qualified"));
    }
}
