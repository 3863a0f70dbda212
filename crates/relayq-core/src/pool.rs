//! Lifecycle manager for a fixed number of workers (spec.md §4.5).

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::executor::Executor;
use crate::metrics::ExecutionMetrics;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::worker::{Worker, WorkerStatus};

struct RunningWorker {
    worker: Arc<Worker>,
    handle: JoinHandle<()>,
}

/// Owns the set of currently-running workers and the shared engine handles
/// they're built from.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    metrics: Arc<ExecutionMetrics>,
    poll_interval: Duration,
    workers: RwLock<Vec<RunningWorker>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<Scheduler>,
        executor: Arc<Executor>,
        metrics: Arc<ExecutionMetrics>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            scheduler,
            executor,
            metrics,
            poll_interval,
            workers: RwLock::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    /// Stop any existing workers, then spawn `n` new workers with
    /// sequential ids `1..=n`.
    pub async fn start(self: &Arc<Self>, n: u32) {
        self.stop_all(Duration::from_secs(10)).await;

        let mut workers = self.workers.write().unwrap();
        for id in 1..=n {
            let worker = Worker::new(
                id,
                self.store.clone(),
                self.scheduler.clone(),
                self.executor.clone(),
                self.metrics.clone(),
                self.poll_interval,
            );
            let handle = tokio::spawn(worker.clone().run());
            workers.push(RunningWorker { worker, handle });
        }
    }

    /// Signal every worker to stop, wait up to `timeout` for each to finish
    /// its current job, then abandon any stragglers. Always idempotent.
    pub async fn stop_all(&self, timeout: Duration) {
        let running: Vec<RunningWorker> = {
            let mut workers = self.workers.write().unwrap();
            std::mem::take(&mut *workers)
        };

        for RunningWorker { worker, handle } in running {
            worker.request_stop();
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!(worker_id = worker.id(), "worker did not stop within timeout, abandoning");
                // The JoinHandle is dropped here; the underlying task keeps
                // running until its current command finishes, then exits on
                // its own since `request_stop` already flipped the flag.
            }
        }
    }

    /// Snapshot of every worker's id, running flag, and current job.
    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers
            .read()
            .unwrap()
            .iter()
            .map(|w| w.worker.status())
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.read().unwrap().len()
    }

    /// Install OS signal handlers (interrupt and terminate) that trigger a
    /// graceful `stop_all` followed by process exit. Spawns its own task;
    /// call this once from a binary entry point, never from a library used
    /// as a dependency.
    pub fn install_signal_handlers(self: Arc<Self>, stop_timeout: Duration) {
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(term) => term,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received interrupt, shutting down"),
                    _ = term.recv() => tracing::info!("received terminate, shutting down"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                tracing::info!("received interrupt, shutting down");
            }

            self.stop_all(stop_timeout).await;
            std::process::exit(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobState};
    use crate::scheduler::SchedulerPolicy;
    use crate::store::test_support::InMemoryStore;

    fn pool_with_store(store: Arc<InMemoryStore>) -> Arc<WorkerPool> {
        let scheduler = Arc::new(Scheduler::new(store.clone(), SchedulerPolicy { backoff_base: 2.0 }));
        let executor = Arc::new(Executor::new(5));
        let metrics = Arc::new(ExecutionMetrics::new());
        WorkerPool::new(store, scheduler, executor, metrics, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn start_spawns_n_workers_with_sequential_ids() {
        let store = Arc::new(InMemoryStore::new());
        let pool = pool_with_store(store);
        pool.start(3).await;

        let mut ids: Vec<u32> = pool.status().iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(pool.worker_count(), 3);

        pool.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn stop_all_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let pool = pool_with_store(store);
        pool.start(2).await;
        pool.stop_all(Duration::from_secs(2)).await;
        pool.stop_all(Duration::from_secs(2)).await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_workers_each_execute_a_distinct_job_once() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..10 {
            store
                .insert(Job::new(
                    format!("job-{i}"),
                    "true",
                    3,
                    0,
                    None,
                    None,
                ))
                .await
                .unwrap();
        }

        let pool = pool_with_store(store.clone());
        pool.start(4).await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = store.stats().await.unwrap();
            if stats.completed == 10 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "jobs did not all complete in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.stop_all(Duration::from_secs(2)).await;

        for i in 0..10 {
            let job = store.get(&format!("job-{i}")).await.unwrap();
            assert_eq!(job.state, JobState::Completed);
            assert_eq!(job.attempts, 0);
        }
    }
}
