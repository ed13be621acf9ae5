//! A minimal reconciliation framework.
//!
//! Event sources push keys through a [`Handle`]; a single worker drains
//! the queue and calls [`Reconciler::reconcile`] per key. Reconciliation
//! of the same key is serialised by the single consumer; a returned
//! `requeue_after` schedules the next run, and errors are retried with
//! exponential backoff. Keys are deduplicated while queued, so a burst of
//! events for one key collapses into one run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One reconciliation step for a key. `Ok(Some(d))` asks to run again
/// after `d`; `Ok(None)` waits for the next event.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn reconcile(&self, key: &str) -> Result<Option<Duration>, BoxError>;
}

/// Cloneable enqueue side of a controller.
#[derive(Clone)]
pub struct Handle {
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl Handle {
    /// Queue `key` for reconciliation. A key already waiting is not
    /// queued twice.
    pub fn enqueue(&self, key: &str) {
        let fresh = self.pending.lock().insert(key.to_string());
        if fresh {
            // Send only fails when the worker is gone; nothing to do then.
            let _ = self.tx.send(key.to_string());
        }
    }

    /// Queue `key` after a delay, from a background task.
    pub fn enqueue_after(&self, key: &str, delay: Duration) {
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.enqueue(&key);
        });
    }
}

/// Worker side of a controller. Owns the receiver; run it once.
pub struct Controller {
    name: &'static str,
    rx: mpsc::UnboundedReceiver<String>,
    handle: Handle,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl Controller {
    pub fn new(name: &'static str) -> (Self, Handle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Handle {
            tx,
            pending: Arc::new(Mutex::new(HashSet::new())),
        };
        (
            Self {
                name,
                rx,
                handle: handle.clone(),
                base_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(5 * 60),
            },
            handle,
        )
    }

    /// Shrink backoff windows; test-sized controllers finish quickly.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Drains the queue for the lifetime of the process. The worker
    /// keeps its own [`Handle`] for requeues, so the loop only ends when
    /// the surrounding runtime shuts down.
    pub async fn run(mut self, reconciler: Arc<dyn Reconciler>) {
        let mut failures: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        loop {
            let key = match self.rx.recv().await {
                Some(key) => key,
                None => return,
            };
            // Events arriving while we reconcile must trigger another
            // run, so the key leaves the pending set before the call.
            self.handle.pending.lock().remove(&key);

            match reconciler.reconcile(&key).await {
                Ok(requeue_after) => {
                    failures.remove(&key);
                    if let Some(delay) = requeue_after {
                        tracing::debug!(
                            controller = self.name,
                            key = %key,
                            after = ?delay,
                            "rescheduling"
                        );
                        self.handle.enqueue_after(&key, delay);
                    }
                }
                Err(e) => {
                    let attempts = failures.entry(key.clone()).or_insert(0);
                    *attempts += 1;
                    let exp = attempts.saturating_sub(1).min(16);
                    let delay = self
                        .base_backoff
                        .saturating_mul(1u32 << exp)
                        .min(self.max_backoff);
                    tracing::warn!(
                        controller = self.name,
                        key = %key,
                        error = %e,
                        attempts = *attempts,
                        retry_in = ?delay,
                        "reconcile failed"
                    );
                    self.handle.enqueue_after(&key, delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        fail_first: u32,
        requeue: Option<Duration>,
        done: mpsc::UnboundedSender<u32>,
    }

    #[async_trait]
    impl Reconciler for Counting {
        async fn reconcile(&self, _key: &str) -> Result<Option<Duration>, BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.done.send(n);
            if n <= self.fail_first {
                return Err("transient".into());
            }
            Ok(self.requeue)
        }
    }

    #[tokio::test]
    async fn reconciles_enqueued_key() {
        let (controller, handle) = Controller::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
            requeue: None,
            done: tx,
        });
        tokio::spawn(controller.run(reconciler));

        handle.enqueue("sp-1");
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn errors_are_retried_with_backoff() {
        let (controller, handle) = Controller::new("test");
        let controller = controller.with_backoff(Duration::from_millis(5), Duration::from_millis(20));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail_first: 2,
            requeue: None,
            done: tx,
        });
        tokio::spawn(controller.run(reconciler));

        handle.enqueue("sp-1");
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn requeue_after_schedules_next_run() {
        let (controller, handle) = Controller::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
            requeue: Some(Duration::from_millis(5)),
            done: tx,
        });
        tokio::spawn(controller.run(reconciler));

        handle.enqueue("sp-1");
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_while_queued() {
        let (controller, handle) = Controller::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconciler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail_first: 0,
            requeue: None,
            done: tx,
        });

        handle.enqueue("sp-1");
        handle.enqueue("sp-1");
        handle.enqueue("sp-1");
        tokio::spawn(controller.run(reconciler));

        assert_eq!(rx.recv().await, Some(1));
        // A second run would land within this window.
        let extra =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err());
    }
}
