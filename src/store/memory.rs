//! In-memory `WorkerStore` for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::traits::WorkerStore;
use crate::worker::model::Worker;

#[derive(Default)]
pub struct InMemoryWorkerStore {
    workers: RwLock<HashMap<Uuid, Worker>>,
}

impl InMemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn put(&self, worker: &Worker) -> Result<(), DatabaseError> {
        self.workers.write().await.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError> {
        Ok(self.workers.read().await.get(&id).cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Worker>, DatabaseError> {
        let mut due: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|w| w.next_scheduled_at);
        Ok(due)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Worker>, DatabaseError> {
        let mut workers: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        workers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workers)
    }
}
