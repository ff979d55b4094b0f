//! Dispatch pool — asynchronous handoff of action intents to the gateway.
//!
//! Lanes never perform gateway I/O: intents go through a bounded queue to a
//! dispatch worker. Failed dispatches retry with linear backoff up to the
//! configured attempt limit, then land in the dead-letter record for
//! external inspection. Nothing is silently dropped.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dealflow_common::config::EngineConfig;
use dealflow_common::rules::ActionIntent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::traits::Dispatcher;

/// An intent the gateway never acknowledged, kept for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub intent: ActionIntent,
    pub attempts: u32,
    pub last_error: String,
    pub at: DateTime<Utc>,
}

enum DispatchMsg {
    Intent(ActionIntent),
    /// Test/shutdown barrier: acked once everything queued before it is done.
    Flush(oneshot::Sender<()>),
}

/// Owns the dispatch queue and worker task.
pub struct DispatchPool {
    tx: mpsc::Sender<DispatchMsg>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    worker: JoinHandle<()>,
}

impl DispatchPool {
    pub fn spawn(dispatcher: Arc<dyn Dispatcher>, config: &EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.dispatch_capacity);
        let dead_letters = Arc::new(Mutex::new(Vec::new()));

        let worker = tokio::spawn(run_worker(
            rx,
            dispatcher,
            Arc::clone(&dead_letters),
            config.dispatch_attempts,
            config.dispatch_backoff,
        ));

        Self {
            tx,
            dead_letters,
            worker,
        }
    }

    /// Hand off one intent. Applies backpressure if the queue is full; the
    /// actual gateway call happens on the worker, never on the caller.
    pub async fn submit(&self, intent: ActionIntent) {
        if self.tx.send(DispatchMsg::Intent(intent)).await.is_err() {
            warn!("Dispatch pool is shut down; intent dropped");
        }
    }

    /// Wait until every intent submitted before this call has been resolved
    /// (acked or dead-lettered).
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(DispatchMsg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Snapshot of the dead-letter record.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }

    /// Close the queue and wait for the worker to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<DispatchMsg>,
    dispatcher: Arc<dyn Dispatcher>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    max_attempts: u32,
    backoff: std::time::Duration,
) {
    while let Some(msg) = rx.recv().await {
        let intent = match msg {
            DispatchMsg::Intent(intent) => intent,
            DispatchMsg::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        let mut last_error = String::new();
        let mut delivered = false;

        for attempt in 1..=max_attempts {
            match dispatcher.dispatch(&intent).await {
                Ok(ack) => {
                    debug!(dedup_key = %ack.dedup_key, attempt, "Intent dispatched");
                    delivered = true;
                    break;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        dedup_key = %intent.dedup_key,
                        attempt,
                        error = %last_error,
                        "Dispatch attempt failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }

        if !delivered {
            warn!(dedup_key = %intent.dedup_key, "Dispatch exhausted retries; dead-lettering");
            dead_letters.lock().unwrap().push(DeadLetter {
                intent,
                attempts: max_attempts,
                last_error,
                at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealflow_common::rules::Action;
    use uuid::Uuid;

    use crate::traits::{FlakyDispatcher, MemoryDispatcher};

    fn intent(key: &str) -> ActionIntent {
        ActionIntent {
            action: Action::NotifyUser {
                user: "owner".into(),
                message: "ping".into(),
            },
            entity_id: Uuid::new_v4(),
            rule_id: "r1".into(),
            dedup_key: key.into(),
            created_at: Utc::now(),
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            dispatch_attempts: 3,
            dispatch_backoff: std::time::Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn delivers_in_submission_order() {
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let pool = DispatchPool::spawn(dispatcher.clone(), &test_config());

        for key in ["a", "b", "c"] {
            pool.submit(intent(key)).await;
        }
        pool.flush().await;

        let keys: Vec<String> = dispatcher
            .dispatched()
            .iter()
            .map(|i| i.dedup_key.clone())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(pool.dead_letters().is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        // Fails twice, succeeds on the third (and last) attempt.
        let dispatcher = Arc::new(FlakyDispatcher::failing(2));
        let pool = DispatchPool::spawn(dispatcher.clone(), &test_config());

        pool.submit(intent("retry-me")).await;
        pool.flush().await;

        assert_eq!(dispatcher.dispatched().len(), 1);
        assert!(pool.dead_letters().is_empty());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter() {
        let dispatcher = Arc::new(FlakyDispatcher::failing(10));
        let pool = DispatchPool::spawn(dispatcher.clone(), &test_config());

        pool.submit(intent("doomed")).await;
        pool.flush().await;

        let dead = pool.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].intent.dedup_key, "doomed");
        assert_eq!(dead[0].attempts, 3);
        assert!(dispatcher.dispatched().is_empty());
        pool.shutdown().await;
    }
}
