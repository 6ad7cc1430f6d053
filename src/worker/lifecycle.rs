//! Worker lifecycle manager: owns status transitions and execution bookkeeping.
//!
//! Every read-modify-write of a worker happens under that worker's async
//! mutex. Execution reports also take a per-worker report slot without
//! waiting: a second report while one is in flight is rejected instead of
//! queued, while a report that meets a pause or stop waits for it and then
//! sees the new status.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::store::WorkerStore;

use super::generator::ConfigurationGenerator;
use super::model::{ExecutionReport, NewWorker, Worker, WorkerStatus};
use super::scheduler::ExecutionScheduler;

/// Source of "now". Injected so tests can pin time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type LockMap = Mutex<HashMap<Uuid, Arc<Mutex<()>>>>;

pub struct WorkerLifecycleManager {
    generator: ConfigurationGenerator,
    store: Arc<dyn WorkerStore>,
    scheduler: ExecutionScheduler,
    locks: LockMap,
    reports: LockMap,
    clock: Clock,
}

impl WorkerLifecycleManager {
    pub fn new(generator: ConfigurationGenerator, store: Arc<dyn WorkerStore>) -> Self {
        Self {
            generator,
            store,
            scheduler: ExecutionScheduler::new(),
            locks: Mutex::new(HashMap::new()),
            reports: Mutex::new(HashMap::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        slot(&self.locks, id).await.lock_owned().await
    }

    /// Load a worker, hiding workers owned by someone else.
    async fn load(&self, user_id: Option<&str>, id: Uuid) -> Result<Worker, LifecycleError> {
        match self.store.get(id).await? {
            Some(worker) if user_id.is_none_or(|u| u == worker.user_id) => Ok(worker),
            _ => Err(LifecycleError::NotFound { id }),
        }
    }

    async fn save(&self, worker: &Worker) -> Result<(), LifecycleError> {
        self.store.put(worker).await?;
        Ok(())
    }

    /// Generate a configuration and materialize a DRAFT worker.
    ///
    /// Nothing is stored when generation fails.
    pub async fn create(&self, request: NewWorker) -> Result<Worker, LifecycleError> {
        let configuration = self
            .generator
            .generate_with_information(
                &request.description,
                &request.information,
                request.worker_type,
            )
            .await?;

        let worker = Worker::draft(request, configuration, self.now());
        self.save(&worker).await?;
        info!(
            worker_id = %worker.id,
            user_id = %worker.user_id,
            worker_type = %worker.worker_type,
            "Worker created"
        );
        Ok(worker)
    }

    /// DRAFT/PAUSED -> ACTIVE, scheduling the next run.
    pub async fn activate(&self, user_id: &str, id: Uuid) -> Result<Worker, LifecycleError> {
        let _guard = self.lock(id).await;
        let mut worker = self.load(Some(user_id), id).await?;
        let now = self.now();

        transition(&mut worker, WorkerStatus::Active, "activate", "activated", now)?;
        // A worker that is already out of runs goes straight to STOPPED.
        if let Some(terminal) = self.scheduler.apply(&mut worker, now) {
            warn!(worker_id = %id, reason = %terminal, "Worker stopped on activation");
        }

        self.save(&worker).await?;
        info!(
            worker_id = %id,
            status = %worker.status,
            next_scheduled_at = ?worker.next_scheduled_at,
            "Worker activated"
        );
        Ok(worker)
    }

    /// ACTIVE -> PAUSED, clearing the schedule.
    pub async fn pause(&self, user_id: &str, id: Uuid) -> Result<Worker, LifecycleError> {
        let _guard = self.lock(id).await;
        let mut worker = self.load(Some(user_id), id).await?;

        transition(&mut worker, WorkerStatus::Paused, "pause", "paused", self.now())?;
        self.save(&worker).await?;
        info!(worker_id = %id, "Worker paused");
        Ok(worker)
    }

    /// Any status -> STOPPED. Idempotent.
    pub async fn stop(&self, user_id: &str, id: Uuid) -> Result<Worker, LifecycleError> {
        let _guard = self.lock(id).await;
        let mut worker = self.load(Some(user_id), id).await?;
        if worker.status.is_terminal() {
            debug!(worker_id = %id, "Worker already stopped");
            return Ok(worker);
        }

        transition(&mut worker, WorkerStatus::Stopped, "stop", "stopped", self.now())?;
        self.save(&worker).await?;
        info!(worker_id = %id, "Worker stopped");
        Ok(worker)
    }

    /// Record an execution attempt reported by the executor and reschedule.
    ///
    /// Rejects with [`LifecycleError::ExecutionInFlight`] rather than waiting
    /// when another report for the same worker is still being recorded.
    pub async fn report_execution(
        &self,
        report: &ExecutionReport,
    ) -> Result<Worker, LifecycleError> {
        let id = report.worker_id;
        let _in_flight = slot(&self.reports, id)
            .await
            .try_lock_owned()
            .map_err(|_| LifecycleError::ExecutionInFlight { id })?;
        let _guard = self.lock(id).await;

        let mut worker = self.load(None, id).await?;
        if worker.status != WorkerStatus::Active {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: worker.status,
                operation: "report execution",
            });
        }

        let now = self.now();
        worker.record_execution(report.outcome, report.replied_observed, now);
        let terminal = self.scheduler.apply(&mut worker, now);
        self.save(&worker).await?;

        info!(
            worker_id = %id,
            outcome = ?report.outcome,
            execution_count = worker.execution_count,
            status = %worker.status,
            next_scheduled_at = ?worker.next_scheduled_at,
            terminal = ?terminal,
            "Execution recorded"
        );
        Ok(worker)
    }

    /// Regenerate the configuration of a DRAFT or PAUSED worker.
    ///
    /// `description` replaces the stored one when given. The superseded
    /// configuration is kept in the worker's history.
    pub async fn reconfigure(
        &self,
        user_id: &str,
        id: Uuid,
        description: Option<String>,
    ) -> Result<Worker, LifecycleError> {
        // Generate outside the lock; the LLM call can take a while.
        let current = self.load(Some(user_id), id).await?;
        ensure_reconfigurable(&current)?;
        let description = description.unwrap_or_else(|| current.description.clone());
        let configuration = self
            .generator
            .generate_with_information(&description, &current.information, current.worker_type)
            .await?;

        let _guard = self.lock(id).await;
        let mut worker = self.load(Some(user_id), id).await?;
        ensure_reconfigurable(&worker)?;

        worker.description = description;
        worker.replace_configuration(configuration, self.now());
        self.save(&worker).await?;
        info!(
            worker_id = %id,
            configuration_version = worker.configuration_version,
            "Worker reconfigured"
        );
        Ok(worker)
    }

    /// Get one of `user_id`'s workers.
    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Worker, LifecycleError> {
        self.load(Some(user_id), id).await
    }

    /// All of `user_id`'s workers, newest first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Worker>, LifecycleError> {
        Ok(self.store.list_for_user(user_id).await?)
    }

    /// Workers due at `now`, across all users.
    pub async fn due_workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>, LifecycleError> {
        Ok(self.store.list_due(now).await?)
    }

    /// Current time according to the manager's clock.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.now()
    }
}

async fn slot(map: &LockMap, id: Uuid) -> Arc<Mutex<()>> {
    map.lock()
        .await
        .entry(id)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn transition(
    worker: &mut Worker,
    target: WorkerStatus,
    operation: &'static str,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let id = worker.id;
    worker
        .transition_to(target, Some(reason.to_string()), at)
        .map_err(|from| LifecycleError::InvalidTransition {
            id,
            from,
            operation,
        })
}

fn ensure_reconfigurable(worker: &Worker) -> Result<(), LifecycleError> {
    match worker.status {
        WorkerStatus::Draft | WorkerStatus::Paused => Ok(()),
        from => Err(LifecycleError::InvalidTransition {
            id: worker.id,
            from,
            operation: "reconfigure",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    use super::*;
    use crate::error::{GenerationError, LlmError};
    use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::store::InMemoryWorkerStore;
    use crate::worker::generator::GeneratorConfig;
    use crate::worker::model::{ExecutionStatus, WorkerType};

    struct ScriptedLlm {
        replies: std::sync::Mutex<VecDeque<String>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = self.replies.lock().unwrap().pop_front().unwrap_or_default();
            Ok(CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    /// 2024-01-01 was a Monday.
    fn monday(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn manager(replies: &[&str]) -> (WorkerLifecycleManager, Arc<InMemoryWorkerStore>) {
        let llm = Arc::new(ScriptedLlm {
            replies: std::sync::Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicU32::new(0),
        });
        let store = Arc::new(InMemoryWorkerStore::new());
        let generator = ConfigurationGenerator::new(llm, GeneratorConfig::default());
        let manager = WorkerLifecycleManager::new(generator, store.clone())
            .with_clock(Arc::new(|| monday(8)));
        (manager, store)
    }

    fn request(worker_type: WorkerType) -> NewWorker {
        NewWorker {
            user_id: "user-1".into(),
            name: "Check-in".into(),
            description: "Send a weekly check-in to alice@x.com".into(),
            worker_type,
            information: vec![],
        }
    }

    const WEEKLY: &str = r#"{"interval": "every Monday", "recipients": ["alice@x.com"]}"#;

    #[tokio::test]
    async fn create_materializes_draft() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Draft);
        assert_eq!(worker.execution_count, 0);
        assert!(worker.next_scheduled_at.is_none());
        assert_eq!(worker.configuration.tone.as_deref(), Some("friendly"));
        assert_eq!(worker.configuration.interval, "every Monday");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_generation_stores_nothing() {
        let (manager, store) = manager(&["nope", "still nope"]);
        let err = manager.create(request(WorkerType::Nurture)).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Generation(GenerationError::MalformedOutput { .. })
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn activate_schedules_and_pause_clears() {
        let (manager, _) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();

        let active = manager.activate("user-1", worker.id).await.unwrap();
        assert_eq!(active.status, WorkerStatus::Active);
        assert_eq!(active.next_scheduled_at, Some(monday(9)));

        let paused = manager.pause("user-1", worker.id).await.unwrap();
        assert_eq!(paused.status, WorkerStatus::Paused);
        assert!(paused.next_scheduled_at.is_none());

        let err = manager.pause("user-1", worker.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { from: WorkerStatus::Paused, .. }));
    }

    #[tokio::test]
    async fn activate_on_stopped_is_rejected_without_mutation() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let stopped = manager.stop("user-1", worker.id).await.unwrap();

        let err = manager.activate("user-1", worker.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: WorkerStatus::Stopped, operation: "activate", .. }
        ));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), stopped);
    }

    #[tokio::test]
    async fn activate_on_active_is_rejected_without_mutation() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let active = manager.activate("user-1", worker.id).await.unwrap();

        let err = manager.activate("user-1", worker.id).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: WorkerStatus::Active, operation: "activate", .. }
        ));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), active);
    }

    #[tokio::test]
    async fn report_requires_an_active_worker() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();

        let err = manager.report_execution(&success(worker.id)).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: WorkerStatus::Draft, operation: "report execution", .. }
        ));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), worker);

        manager.activate("user-1", worker.id).await.unwrap();
        let paused = manager.pause("user-1", worker.id).await.unwrap();
        let err = manager.report_execution(&success(worker.id)).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: WorkerStatus::Paused, operation: "report execution", .. }
        ));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), paused);
    }

    #[tokio::test]
    async fn observed_reply_stops_a_stop_if_replied_worker() {
        let (manager, store) = manager(&[
            r#"{"interval": "daily at 9am", "recipients": ["a@example.com"], "lifespan": 5, "stopIfReplied": true}"#,
        ]);
        let worker = manager.create(request(WorkerType::Outreach)).await.unwrap();
        manager.activate("user-1", worker.id).await.unwrap();

        let quiet = manager.report_execution(&success(worker.id)).await.unwrap();
        assert_eq!(quiet.status, WorkerStatus::Active);

        let replied = manager
            .report_execution(&ExecutionReport {
                worker_id: worker.id,
                outcome: ExecutionStatus::Success,
                replied_observed: true,
            })
            .await
            .unwrap();
        assert_eq!(replied.status, WorkerStatus::Stopped);
        assert_eq!(replied.execution_count, 2);
        assert!(replied.next_scheduled_at.is_none());
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), replied);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (manager, _) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let first = manager.stop("user-1", worker.id).await.unwrap();
        let second = manager.stop("user-1", worker.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.transitions.len(), 1);
    }

    #[tokio::test]
    async fn last_execution_within_lifespan_stops() {
        let (manager, _) = manager(&[
            r#"{"interval": "daily at 9am", "recipients": ["a@example.com"], "lifespan": 2}"#,
        ]);
        let worker = manager.create(request(WorkerType::Outreach)).await.unwrap();
        manager.activate("user-1", worker.id).await.unwrap();

        let report = ExecutionReport {
            worker_id: worker.id,
            outcome: ExecutionStatus::Success,
            replied_observed: false,
        };
        let after_first = manager.report_execution(&report).await.unwrap();
        assert_eq!(after_first.status, WorkerStatus::Active);
        assert_eq!(after_first.next_scheduled_at, Some(monday(9)));

        let after_second = manager.report_execution(&report).await.unwrap();
        assert_eq!(after_second.status, WorkerStatus::Stopped);
        assert_eq!(after_second.execution_count, 2);
        assert!(after_second.next_scheduled_at.is_none());

        let err = manager.report_execution(&report).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    fn success(worker_id: Uuid) -> ExecutionReport {
        ExecutionReport {
            worker_id,
            outcome: ExecutionStatus::Success,
            replied_observed: false,
        }
    }

    #[tokio::test]
    async fn second_report_in_flight_is_rejected() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let active = manager.activate("user-1", worker.id).await.unwrap();

        let _in_flight = slot(&manager.reports, worker.id).await.try_lock_owned().unwrap();
        let err = manager.report_execution(&success(worker.id)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ExecutionInFlight { .. }));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap(), active);
    }

    #[tokio::test]
    async fn report_racing_a_pause_sees_the_pause() {
        let (manager, store) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        manager.activate("user-1", worker.id).await.unwrap();

        // A pause holds the worker lock while the report arrives.
        let report = success(worker.id);
        let pausing = manager.lock(worker.id).await;
        let (result, ()) = tokio::join!(manager.report_execution(&report), async {
            tokio::task::yield_now().await;
            let mut current = store.get(worker.id).await.unwrap().unwrap();
            current
                .transition_to(WorkerStatus::Paused, Some("paused".into()), monday(8))
                .unwrap();
            store.put(&current).await.unwrap();
            drop(pausing);
        });

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { from: WorkerStatus::Paused, operation: "report execution", .. }
        ));
        assert_eq!(store.get(worker.id).await.unwrap().unwrap().execution_count, 0);
    }

    #[tokio::test]
    async fn other_users_see_not_found() {
        let (manager, _) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let err = manager.activate("intruder", worker.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
        assert!(manager.list("intruder").await.unwrap().is_empty());
        assert_eq!(manager.list("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconfigure_versions_configuration() {
        let (manager, _) = manager(&[
            WEEKLY,
            r#"{"interval": "every 3 days", "recipients": ["alice@x.com"], "tone": "formal"}"#,
        ]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        let updated = manager
            .reconfigure("user-1", worker.id, Some("check in every three days".into()))
            .await
            .unwrap();
        assert_eq!(updated.configuration_version, 2);
        assert_eq!(updated.configuration.interval, "every 3 days");
        assert_eq!(updated.configuration.tone.as_deref(), Some("formal"));
        assert_eq!(updated.description, "check in every three days");
        assert_eq!(updated.configuration_history[0].configuration, worker.configuration);
    }

    #[tokio::test]
    async fn reconfigure_requires_draft_or_paused() {
        let (manager, _) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        manager.activate("user-1", worker.id).await.unwrap();
        let err = manager.reconfigure("user-1", worker.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition { operation: "reconfigure", .. }
        ));
    }

    #[tokio::test]
    async fn due_workers_lists_active_past_due() {
        let (manager, _) = manager(&[WEEKLY]);
        let worker = manager.create(request(WorkerType::Nurture)).await.unwrap();
        manager.activate("user-1", worker.id).await.unwrap();
        assert!(manager.due_workers(monday(8)).await.unwrap().is_empty());
        let due = manager.due_workers(monday(9) + Duration::minutes(1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, worker.id);
    }
}
