//! Due sweep: hands due workers to the external executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::lifecycle::WorkerLifecycleManager;
use super::model::Worker;

/// Remembers which scheduled run of each worker has already been dispatched,
/// so a worker whose report has not come back yet is not sent twice.
pub struct DueSweep {
    manager: Arc<WorkerLifecycleManager>,
    dispatched: HashMap<Uuid, DateTime<Utc>>,
}

impl DueSweep {
    pub fn new(manager: Arc<WorkerLifecycleManager>) -> Self {
        Self {
            manager,
            dispatched: HashMap::new(),
        }
    }

    /// Workers due now that have not been dispatched for their current run.
    pub async fn sweep(&mut self) -> Vec<Worker> {
        let now = self.manager.current_time();
        let due = match self.manager.due_workers(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Due sweep failed");
                return Vec::new();
            }
        };

        // Forget workers that are no longer due (reported, paused, stopped).
        self.dispatched
            .retain(|id, _| due.iter().any(|w| w.id == *id));

        due.into_iter()
            .filter(|worker| {
                let Some(at) = worker.next_scheduled_at else {
                    return false;
                };
                self.dispatched.insert(worker.id, at) != Some(at)
            })
            .collect()
    }
}

/// Spawn the due-sweep background task. Stops when the receiver is dropped.
pub fn spawn_due_ticker(
    manager: Arc<WorkerLifecycleManager>,
    interval: Duration,
    tx: mpsc::Sender<Worker>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = DueSweep::new(manager);
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            for worker in sweep.sweep().await {
                tracing::debug!(
                    worker_id = %worker.id,
                    next_scheduled_at = ?worker.next_scheduled_at,
                    "Dispatching due worker"
                );
                if tx.send(worker).await.is_err() {
                    tracing::info!("Executor channel closed, stopping due ticker");
                    return;
                }
            }
        }
    })
}
