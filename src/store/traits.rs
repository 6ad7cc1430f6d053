//! `WorkerStore` trait: the narrow persistence interface the lifecycle
//! manager depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::worker::model::Worker;

/// Backend-agnostic worker persistence.
///
/// `put` replaces the whole worker atomically; there are no partial updates.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Insert or replace a worker.
    async fn put(&self, worker: &Worker) -> Result<(), DatabaseError>;

    /// Get a worker by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Worker>, DatabaseError>;

    /// ACTIVE workers whose next run is at or before `now`, earliest first.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Worker>, DatabaseError>;

    /// All workers owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Worker>, DatabaseError>;
}
