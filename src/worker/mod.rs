//! Email workers: configuration generation, lifecycle and scheduling.
//!
//! Core components:
//! - `model`: Worker, Configuration and status types
//! - `policy`: per-type defaults and validation rules
//! - `validator`: structural and semantic configuration checks
//! - `generator`: description to configuration via the LLM
//! - `interval` / `scheduler`: next-run computation and terminal states
//! - `lifecycle`: serialized state transitions over a `WorkerStore`
//! - `ticker`: due sweep that feeds the executor
//! - `routes`: REST surface

pub mod generator;
pub mod interval;
pub mod lifecycle;
pub mod model;
pub mod policy;
pub mod reply;
pub mod routes;
pub mod scheduler;
pub mod ticker;
pub mod validator;

pub use generator::{ConfigurationGenerator, GeneratorConfig};
pub use interval::Interval;
pub use lifecycle::WorkerLifecycleManager;
pub use model::{
    Configuration, ExecutionReport, ExecutionStatus, NewWorker, Worker, WorkerStatus, WorkerType,
};
pub use scheduler::{ExecutionScheduler, NextRun, Terminal};
