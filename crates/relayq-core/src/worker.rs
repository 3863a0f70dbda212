//! A single long-lived polling consumer.
//!
//! State machine: `Idle -> Claiming -> Running -> Reporting -> Idle`, with
//! `Stopping` reachable from any state and honoured at the next iteration
//! boundary (spec.md §4.4). Unexpected storage errors are logged and the
//! loop sleeps one poll interval — it never terminates on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::executor::Executor;
use crate::metrics::ExecutionMetrics;
use crate::scheduler::Scheduler;
use crate::store::JobStore;

/// Observable phase of a worker's main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Claiming,
    Running,
    Reporting,
    Stopping,
}

/// A point-in-time snapshot of a worker, suitable for `status` reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub id: u32,
    pub running: bool,
    pub current_job_id: Option<String>,
    pub phase: WorkerPhase,
}

/// Micro-backoff applied after losing a claim race to another worker.
const CLAIM_RACE_BACKOFF: Duration = Duration::from_millis(100);

pub struct Worker {
    id: u32,
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    metrics: Arc<ExecutionMetrics>,
    poll_interval: Duration,
    current_job_id: RwLock<Option<String>>,
    running: AtomicBool,
    phase: RwLock<WorkerPhase>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: u32,
        store: Arc<dyn JobStore>,
        scheduler: Arc<Scheduler>,
        executor: Arc<Executor>,
        metrics: Arc<ExecutionMetrics>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            id,
            store,
            scheduler,
            executor,
            metrics,
            poll_interval,
            current_job_id: RwLock::new(None),
            running: AtomicBool::new(false),
            phase: RwLock::new(WorkerPhase::Idle),
            stop_tx,
            stop_rx,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.current_job_id.read().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.read().unwrap()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            running: self.is_running(),
            current_job_id: self.current_job_id(),
            phase: self.phase(),
        }
    }

    /// Signal this worker to stop at the next loop boundary. Does not wait.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn set_current_job(&self, job_id: Option<String>) {
        *self.current_job_id.write().unwrap() = job_id;
    }

    fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write().unwrap() = phase;
    }

    /// Run the main loop until `request_stop` is called. Intended to be
    /// spawned as its own task by [`crate::pool::WorkerPool`].
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.set_phase(WorkerPhase::Idle);
        let mut stop_rx = self.stop_rx.clone();

        loop {
            if *stop_rx.borrow() {
                self.set_phase(WorkerPhase::Stopping);
                break;
            }

            self.set_phase(WorkerPhase::Claiming);
            match self.run_one_iteration().await {
                Ok(true) => {
                    // Made progress (claimed and ran a job); poll again immediately.
                }
                Ok(false) => {
                    self.set_phase(WorkerPhase::Idle);
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
                Err(err) => {
                    self.set_phase(WorkerPhase::Idle);
                    tracing::error!(worker_id = self.id, error = %err, "worker loop error");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// One pass of the loop. Returns `Ok(true)` if a job was claimed and run,
    /// `Ok(false)` if there was nothing to do this tick.
    ///
    /// `scheduler.pick_next` performs any due retry-release as a side effect
    /// (`failed -> pending`) and tells us whether *something* is now
    /// available; the actual claim is a separate atomic `claim_pending`
    /// against the store, so the job this worker ends up running need not be
    /// byte-for-byte the one `pick_next` described — both are valid due
    /// candidates under the same priority/age ordering, and an empty result
    /// here just means another worker won the race in between.
    async fn run_one_iteration(&self) -> Result<bool, crate::error::StoreError> {
        if self.scheduler.pick_next().await?.is_none() {
            return Ok(false);
        }

        let now = chrono::Utc::now();
        match self.store.claim_pending(now).await? {
            Some(job) => {
                self.execute_claimed(job).await?;
                Ok(true)
            }
            None => {
                tokio::time::sleep(CLAIM_RACE_BACKOFF).await;
                Ok(false)
            }
        }
    }

    async fn execute_claimed(
        &self,
        job: crate::job::Job,
    ) -> Result<(), crate::error::StoreError> {
        self.set_current_job(Some(job.id.clone()));
        self.set_phase(WorkerPhase::Running);
        self.metrics.record_start(&job.id);

        let outcome = self.executor.execute(&job).await;

        self.metrics.record_end(&job.id, outcome.success);
        self.set_phase(WorkerPhase::Reporting);
        let finalized = self.scheduler.finalize(job, outcome).await;
        self.set_current_job(None);
        finalized?;
        Ok(())
    }
}
