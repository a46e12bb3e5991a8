//! Background task supervision with named handles and bulk cancellation

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

/// Counters of finished task outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutcomeCounts {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct OutcomeCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Tracks spawned background tasks under logical names and can cancel all of
/// them together.
///
/// Each spawned task gets a completion watcher that awaits the join handle,
/// classifies the outcome (completed / failed / cancelled) for metrics, and
/// removes the entry from the map.
#[derive(Clone)]
pub struct TaskSupervisor {
    tasks: Arc<Mutex<HashMap<String, AbortHandle>>>,
    counters: Arc<OutcomeCounters>,
    reaped: Arc<Notify>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(OutcomeCounters::default()),
            reaped: Arc::new(Notify::new()),
        }
    }

    /// Spawn a future under a logical name and track it.
    pub async fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        {
            let mut tasks = self.tasks.lock().await;
            if tasks.insert(name.clone(), handle.abort_handle()).is_some() {
                warn!(task = %name, "replaced an already-tracked task handle");
            }
        }

        // Completion watcher: classify the outcome and drop the map entry.
        let tasks = Arc::clone(&self.tasks);
        let counters = Arc::clone(&self.counters);
        let reaped = Arc::clone(&self.reaped);
        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(task = %name, "task completed");
                }
                Err(err) if err.is_cancelled() => {
                    counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!(task = %name, "task cancelled");
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(task = %name, %err, "task failed");
                }
            }
            tasks.lock().await.remove(&name);
            reaped.notify_waiters();
        });
    }

    /// Spawn a future that returns a `Result`, logging any error it ends with.
    pub async fn spawn_with_result<F, E>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Debug + Send + 'static,
    {
        let name = name.into();
        let log_name = name.clone();
        self.spawn(name, async move {
            if let Err(err) = future.await {
                error!(task = %log_name, ?err, "supervised task failed");
            }
        })
        .await;
    }

    /// Cancel every tracked task and wait until all of them have been reaped.
    /// Join errors are classified, never propagated.
    pub async fn cancel_all(&self) {
        loop {
            let pending = {
                let tasks = self.tasks.lock().await;
                for handle in tasks.values() {
                    handle.abort();
                }
                tasks.len()
            };
            if pending == 0 {
                return;
            }
            // Watchers remove entries as the aborted tasks settle. The
            // timeout re-checks the map in case a notify slipped in between
            // the length check and this await.
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(50),
                self.reaped.notified(),
            )
            .await;
        }
    }

    /// Number of currently tracked tasks.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Snapshot of finished-task outcome counters.
    pub fn outcome_counts(&self) -> TaskOutcomeCounts {
        TaskOutcomeCounts {
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
