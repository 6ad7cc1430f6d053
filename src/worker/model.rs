//! Worker and configuration data model.
//!
//! A worker pairs an immutable, versioned [`Configuration`] with lifecycle
//! state. Status changes go through [`Worker::transition_to`], which enforces
//! the state machine and records history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context-email fetch limit when a configuration does not set one.
pub const DEFAULT_CONTEXT_LIMIT: u32 = 5;

/// Executions allowed when neither the model nor the type policy sets a lifespan.
pub const DEFAULT_LIFESPAN: u32 = 1;

/// Cap on the execution and transition histories kept on a worker.
pub const MAX_HISTORY: usize = 200;

/// Behavioral category of a worker. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerType {
    /// Cold emails to a list of recipients.
    Outreach,
    /// Conversational relationship check-ins.
    Nurture,
    /// Replies to emails from the given recipients.
    Responder,
    /// Summarizes many emails into one.
    Digest,
}

impl WorkerType {
    pub const ALL: [WorkerType; 4] = [
        WorkerType::Outreach,
        WorkerType::Nurture,
        WorkerType::Responder,
        WorkerType::Digest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::Outreach => "OUTREACH",
            WorkerType::Nurture => "NURTURE",
            WorkerType::Responder => "RESPONDER",
            WorkerType::Digest => "DIGEST",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OUTREACH" => Ok(WorkerType::Outreach),
            "NURTURE" => Ok(WorkerType::Nurture),
            "RESPONDER" => Ok(WorkerType::Responder),
            "DIGEST" => Ok(WorkerType::Digest),
            other => Err(format!("unknown worker type: {other}")),
        }
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Generated but never activated.
    Draft,
    /// Runnable; has a next scheduled run.
    Active,
    /// Suspended by the user or the system.
    Paused,
    /// Terminal.
    Stopped,
}

impl WorkerStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerStatus) -> bool {
        use WorkerStatus::*;

        matches!(
            (self, target),
            (Draft, Active) | (Draft, Stopped) |
            (Active, Paused) | (Active, Stopped) |
            (Paused, Active) | (Paused, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

/// Outcome of one execution attempt, as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Which prior emails to pull in as LLM context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEmails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<String>,
    pub limit: u32,
}

impl Default for ContextEmails {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            from: Vec::new(),
            limit: DEFAULT_CONTEXT_LIMIT,
        }
    }
}

/// Behavioral contract for a worker's actions.
///
/// Only produced by the validator; never mutated once attached to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub interval: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_emails: Option<ContextEmails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    /// `None` lets the model pick a subject at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifespan: Option<u32>,
    #[serde(default)]
    pub stop_if_replied: bool,
}

impl Configuration {
    /// Total executions allowed before the worker is stopped.
    pub fn effective_lifespan(&self) -> u32 {
        self.lifespan.unwrap_or(DEFAULT_LIFESPAN)
    }

    pub fn context_limit(&self) -> u32 {
        self.context_emails
            .as_ref()
            .map(|c| c.limit)
            .unwrap_or(DEFAULT_CONTEXT_LIMIT)
    }
}

/// A superseded configuration and the version it ran under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedConfiguration {
    pub version: u32,
    pub configuration: Configuration,
    pub superseded_at: DateTime<Utc>,
}

/// One completed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub at: DateTime<Utc>,
    pub outcome: ExecutionStatus,
    pub configuration_version: u32,
    pub replied_observed: bool,
}

/// A status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub from: WorkerStatus,
    pub to: WorkerStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Report sent by the external executor after attempting a worker's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub worker_id: Uuid,
    pub outcome: ExecutionStatus,
    #[serde(default)]
    pub replied_observed: bool,
}

/// Input to worker creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorker {
    pub user_id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub worker_type: WorkerType,
    #[serde(default)]
    pub information: Vec<String>,
}

/// A persistent email worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub worker_type: WorkerType,
    #[serde(default)]
    pub information: Vec<String>,
    pub status: WorkerStatus,
    pub configuration: Configuration,
    pub configuration_version: u32,
    /// Superseded configurations, oldest first.
    #[serde(default)]
    pub configuration_history: Vec<VersionedConfiguration>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub execution_count: u64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
    #[serde(default)]
    pub transitions: Vec<StatusTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    /// Materialize a fresh DRAFT worker around a validated configuration.
    pub fn draft(request: NewWorker, configuration: Configuration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            name: request.name,
            description: request.description,
            worker_type: request.worker_type,
            information: request.information,
            status: WorkerStatus::Draft,
            configuration,
            configuration_version: 1,
            configuration_history: Vec::new(),
            last_execution_status: None,
            execution_count: 0,
            last_executed_at: None,
            next_scheduled_at: None,
            executions: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new status. On rejection returns the current status and
    /// leaves the worker untouched.
    pub fn transition_to(
        &mut self,
        target: WorkerStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), WorkerStatus> {
        if !self.status.can_transition_to(target) {
            return Err(self.status);
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to: target,
            at,
            reason,
        });
        trim_history(&mut self.transitions);

        self.status = target;
        self.updated_at = at;
        if target != WorkerStatus::Active {
            self.next_scheduled_at = None;
        }
        Ok(())
    }

    /// Record a completed execution attempt.
    pub fn record_execution(
        &mut self,
        outcome: ExecutionStatus,
        replied_observed: bool,
        at: DateTime<Utc>,
    ) {
        self.execution_count += 1;
        self.last_executed_at = Some(at);
        self.last_execution_status = Some(outcome);
        self.updated_at = at;
        self.executions.push(ExecutionRecord {
            at,
            outcome,
            configuration_version: self.configuration_version,
            replied_observed,
        });
        trim_history(&mut self.executions);
    }

    /// Attach a new configuration version, keeping the old one for audit.
    pub fn replace_configuration(&mut self, configuration: Configuration, at: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.configuration, configuration);
        self.configuration_history.push(VersionedConfiguration {
            version: self.configuration_version,
            configuration: previous,
            superseded_at: at,
        });
        self.configuration_version += 1;
        self.updated_at = at;
    }

    /// Whether the most recent execution saw a reply.
    pub fn last_reply_observed(&self) -> bool {
        self.executions
            .last()
            .map(|e| e.replied_observed)
            .unwrap_or(false)
    }

    /// ACTIVE with a next run at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkerStatus::Active && self.next_scheduled_at.is_some_and(|at| at <= now)
    }
}

fn trim_history<T>(history: &mut Vec<T>) {
    if history.len() > MAX_HISTORY {
        let drain_count = history.len() - MAX_HISTORY;
        history.drain(..drain_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Configuration {
        Configuration {
            interval: "daily at 9am".into(),
            recipients: vec!["alice@example.com".into()],
            context_emails: None,
            tone: None,
            style: None,
            custom_instructions: None,
            subject_template: None,
            lifespan: None,
            stop_if_replied: false,
        }
    }

    fn draft() -> Worker {
        Worker::draft(
            NewWorker {
                user_id: "user-1".into(),
                name: "Check-in".into(),
                description: "weekly check-in".into(),
                worker_type: WorkerType::Nurture,
                information: vec![],
            },
            config(),
            Utc::now(),
        )
    }

    #[test]
    fn status_transitions_valid() {
        assert!(WorkerStatus::Draft.can_transition_to(WorkerStatus::Active));
        assert!(WorkerStatus::Active.can_transition_to(WorkerStatus::Paused));
        assert!(WorkerStatus::Paused.can_transition_to(WorkerStatus::Active));
        assert!(WorkerStatus::Paused.can_transition_to(WorkerStatus::Stopped));
    }

    #[test]
    fn status_transitions_invalid() {
        assert!(!WorkerStatus::Active.can_transition_to(WorkerStatus::Active));
        assert!(!WorkerStatus::Draft.can_transition_to(WorkerStatus::Paused));
        assert!(!WorkerStatus::Stopped.can_transition_to(WorkerStatus::Active));
        assert!(!WorkerStatus::Stopped.can_transition_to(WorkerStatus::Stopped));
        assert!(!WorkerStatus::Paused.can_transition_to(WorkerStatus::Draft));
    }

    #[test]
    fn rejected_transition_leaves_worker_untouched() {
        let mut worker = draft();
        let before = worker.clone();
        assert_eq!(
            worker.transition_to(WorkerStatus::Paused, None, Utc::now()),
            Err(WorkerStatus::Draft)
        );
        assert_eq!(worker, before);
    }

    #[test]
    fn leaving_active_clears_schedule() {
        let mut worker = draft();
        worker
            .transition_to(WorkerStatus::Active, None, Utc::now())
            .unwrap();
        worker.next_scheduled_at = Some(Utc::now());
        worker
            .transition_to(WorkerStatus::Paused, Some("user".into()), Utc::now())
            .unwrap();
        assert!(worker.next_scheduled_at.is_none());
        assert_eq!(worker.transitions.len(), 2);
        assert_eq!(worker.transitions[1].reason.as_deref(), Some("user"));
    }

    #[test]
    fn execution_history_capped() {
        let mut worker = draft();
        for _ in 0..250 {
            worker.record_execution(ExecutionStatus::Success, false, Utc::now());
        }
        assert_eq!(worker.execution_count, 250);
        assert_eq!(worker.executions.len(), MAX_HISTORY);
    }

    #[test]
    fn replace_configuration_bumps_version() {
        let mut worker = draft();
        let mut next = config();
        next.tone = Some("formal".into());
        worker.replace_configuration(next.clone(), Utc::now());
        assert_eq!(worker.configuration_version, 2);
        assert_eq!(worker.configuration, next);
        assert_eq!(worker.configuration_history.len(), 1);
        assert_eq!(worker.configuration_history[0].version, 1);
        assert_eq!(worker.configuration_history[0].configuration, config());
    }

    #[test]
    fn worker_type_serde_and_parse() {
        let json = serde_json::to_string(&WorkerType::Nurture).unwrap();
        assert_eq!(json, "\"NURTURE\"");
        assert_eq!("digest".parse::<WorkerType>(), Ok(WorkerType::Digest));
        assert!("newsletter".parse::<WorkerType>().is_err());
    }

    #[test]
    fn status_display_parse() {
        for status in [
            WorkerStatus::Draft,
            WorkerStatus::Active,
            WorkerStatus::Paused,
            WorkerStatus::Stopped,
        ] {
            let parsed: WorkerStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn configuration_serializes_camel_case_without_unset_fields() {
        let mut cfg = config();
        cfg.custom_instructions = Some("sign as Sam".into());
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["customInstructions"], "sign as Sam");
        assert!(value.get("tone").is_none());
        assert_eq!(value["stopIfReplied"], false);
    }
}
