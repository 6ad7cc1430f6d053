//! Execution scheduler: decides when a worker next runs and when it is done.
//!
//! Stateless: every decision is a function of the worker alone. The only
//! side effects live in [`ExecutionScheduler::apply`], which writes the
//! decision back onto the worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::interval::Interval;
use super::model::{Worker, WorkerStatus};

/// Why a worker has no next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// DRAFT, PAUSED or STOPPED: nothing to schedule, status left alone.
    NotRunnable,
    /// Execution count reached the configured lifespan.
    LifespanExhausted,
    /// `stopIfReplied` was set and the last execution observed a reply.
    ReplyObserved,
    /// The interval has no fire time after the anchor.
    ScheduleExhausted,
    /// The attached interval no longer parses.
    InvalidInterval(String),
}

impl Terminal {
    /// Whether this outcome permanently stops the worker.
    pub fn stops_worker(&self) -> bool {
        !matches!(self, Terminal::NotRunnable)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::NotRunnable => f.write_str("not runnable"),
            Terminal::LifespanExhausted => f.write_str("lifespan exhausted"),
            Terminal::ReplyObserved => f.write_str("reply observed"),
            Terminal::ScheduleExhausted => f.write_str("schedule exhausted"),
            Terminal::InvalidInterval(reason) => write!(f, "invalid interval: {reason}"),
        }
    }
}

/// Result of a scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRun {
    At(DateTime<Utc>),
    Terminal(Terminal),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionScheduler;

impl ExecutionScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Compute the next run for `worker`.
    ///
    /// The next run is the first interval match strictly after the last
    /// execution (or creation). It may already be in the past, in which case
    /// the worker is simply due.
    pub fn next_run(&self, worker: &Worker) -> NextRun {
        if worker.status != WorkerStatus::Active {
            return NextRun::Terminal(Terminal::NotRunnable);
        }

        let configuration = &worker.configuration;
        if worker.execution_count >= u64::from(configuration.effective_lifespan()) {
            return NextRun::Terminal(Terminal::LifespanExhausted);
        }

        if configuration.stop_if_replied && worker.last_reply_observed() {
            return NextRun::Terminal(Terminal::ReplyObserved);
        }

        let interval = match Interval::from_str(&configuration.interval) {
            Ok(interval) => interval,
            Err(reason) => return NextRun::Terminal(Terminal::InvalidInterval(reason)),
        };

        let anchor = worker.last_executed_at.unwrap_or(worker.created_at);
        match interval.next_after(anchor) {
            Some(at) => NextRun::At(at),
            None => NextRun::Terminal(Terminal::ScheduleExhausted),
        }
    }

    /// Write the decision for `worker` back onto it: set `next_scheduled_at`,
    /// or stop the worker when the decision is terminal.
    ///
    /// Returns the terminal reason, if any.
    pub fn apply(&self, worker: &mut Worker, now: DateTime<Utc>) -> Option<Terminal> {
        match self.next_run(worker) {
            NextRun::At(at) => {
                worker.next_scheduled_at = Some(at);
                None
            }
            NextRun::Terminal(terminal) => {
                if terminal.stops_worker() && !worker.status.is_terminal() {
                    let from = worker.status;
                    if worker
                        .transition_to(WorkerStatus::Stopped, Some(terminal.to_string()), now)
                        .is_ok()
                    {
                        tracing::info!(
                            worker_id = %worker.id,
                            from = %from,
                            reason = %terminal,
                            "Worker stopped by scheduler"
                        );
                    }
                }
                worker.next_scheduled_at = None;
                Some(terminal)
            }
        }
    }
}
