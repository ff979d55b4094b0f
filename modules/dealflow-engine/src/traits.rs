//! Boundary traits for the engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dealflow_common::rules::ActionIntent;

/// Acknowledgment from the dispatcher gateway for one intent.
#[derive(Debug, Clone)]
pub struct Ack {
    pub dedup_key: String,
}

/// The dispatcher gateway — executes action intents (notifications, tasks).
///
/// Delivery from the engine is at-least-once; implementations use the
/// intent's dedup key for at-most-once effective execution. Errors are
/// retryable: the dispatch pool retries with backoff and dead-letters after
/// the configured attempt limit.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, intent: &ActionIntent) -> Result<Ack>;
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn dispatch(&self, intent: &ActionIntent) -> Result<Ack> {
        (**self).dispatch(intent).await
    }
}

// ---------------------------------------------------------------------------
// MemoryDispatcher (tests — records everything, always acks)
// ---------------------------------------------------------------------------

/// In-memory dispatcher for testing. Records intents for assertions.
#[derive(Default)]
pub struct MemoryDispatcher {
    intents: Mutex<Vec<ActionIntent>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All dispatched intents, in handoff order.
    pub fn dispatched(&self) -> Vec<ActionIntent> {
        self.intents.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn dispatch(&self, intent: &ActionIntent) -> Result<Ack> {
        self.intents.lock().unwrap().push(intent.clone());
        Ok(Ack {
            dedup_key: intent.dedup_key.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// FlakyDispatcher (tests — fails the first N calls, then delegates)
// ---------------------------------------------------------------------------

/// Test double that fails its first `fail_count` dispatch calls, then
/// behaves like `MemoryDispatcher`. Exercises the retry / dead-letter path.
pub struct FlakyDispatcher {
    remaining_failures: AtomicU32,
    inner: MemoryDispatcher,
}

impl FlakyDispatcher {
    pub fn failing(fail_count: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(fail_count),
            inner: MemoryDispatcher::new(),
        }
    }

    pub fn dispatched(&self) -> Vec<ActionIntent> {
        self.inner.dispatched()
    }
}

#[async_trait]
impl Dispatcher for FlakyDispatcher {
    async fn dispatch(&self, intent: &ActionIntent) -> Result<Ack> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("simulated gateway outage"));
        }
        self.inner.dispatch(intent).await
    }
}
