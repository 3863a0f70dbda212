//! Scheduling and execution engine for a persistent background job queue.
//!
//! This crate owns the domain model and the pieces that operate on it
//! purely in terms of the [`store::JobStore`] trait: the [`executor::Executor`]
//! that runs a job's command, the [`scheduler::Scheduler`] that decides what
//! runs next and how failures are retried or dead-lettered, the
//! [`worker::Worker`] polling loop, and the [`pool::WorkerPool`] that owns a
//! fixed set of them. Concrete storage backends and outer collaborators
//! (CLI, config file, logging setup) live in sibling crates.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, StoreError};
pub use executor::{ExecutionOutcome, Executor};
pub use job::{Job, JobState};
pub use metrics::{ExecutionMetrics, ExecutionStats};
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SchedulerPolicy};
pub use store::{JobStats, JobStore};
pub use worker::{Worker, WorkerPhase, WorkerStatus};
