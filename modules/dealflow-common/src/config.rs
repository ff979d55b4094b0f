use std::env;
use std::time::Duration;

/// Engine tuning knobs, loaded from environment variables. Every knob has a
/// default; malformed values panic with a clear message at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each per-entity lane queue (ingress backpressure past this).
    pub lane_capacity: usize,
    /// Out-of-order events buffered per lane before the lane degrades.
    pub reorder_horizon: usize,
    /// Dispatch attempts per intent before dead-lettering.
    pub dispatch_attempts: u32,
    /// Base backoff between dispatch retries (multiplied by attempt number).
    pub dispatch_backoff: Duration,
    /// Bound on the dispatch pool queue.
    pub dispatch_capacity: usize,
    /// Budget for the rule-evaluation phase of one event.
    pub rule_timeout: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            lane_capacity: env_usize("DEALFLOW_LANE_CAPACITY", 64),
            reorder_horizon: env_usize("DEALFLOW_REORDER_HORIZON", 32),
            dispatch_attempts: env_u32("DEALFLOW_DISPATCH_ATTEMPTS", 3),
            dispatch_backoff: Duration::from_millis(env_u64("DEALFLOW_DISPATCH_BACKOFF_MS", 100)),
            dispatch_capacity: env_usize("DEALFLOW_DISPATCH_CAPACITY", 256),
            rule_timeout: Duration::from_millis(env_u64("DEALFLOW_RULE_TIMEOUT_MS", 1000)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lane_capacity: 64,
            reorder_horizon: 32,
            dispatch_attempts: 3,
            dispatch_backoff: Duration::from_millis(100),
            dispatch_capacity: 256,
            rule_timeout: Duration::from_millis(1000),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .map(|v| v.parse().unwrap_or_else(|_| panic!("{key} must be a number")))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .map(|v| v.parse().unwrap_or_else(|_| panic!("{key} must be a number")))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .map(|v| v.parse().unwrap_or_else(|_| panic!("{key} must be a number")))
        .unwrap_or(default)
}
