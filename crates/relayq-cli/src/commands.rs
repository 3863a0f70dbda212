//! Implementations of each CLI command, grounded on `queuectl/cli.py`'s
//! per-command bodies (field-by-field `click.echo` output, same error
//! phrasing and exit codes).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use relayq_core::config::EngineConfig;
use relayq_core::executor::Executor;
use relayq_core::job::{Job, JobState};
use relayq_core::metrics::ExecutionMetrics;
use relayq_core::pool::WorkerPool;
use relayq_core::scheduler::{Scheduler, SchedulerPolicy};
use relayq_core::store::JobStore;
use relayq_sqlite::SqliteJobStore;

use crate::cli::JobStateArg;
use crate::config::ConfigStore;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct EnqueuePayload {
    id: String,
    command: String,
    max_retries: Option<i64>,
    #[serde(default)]
    priority: i64,
    run_at: Option<DateTime<Utc>>,
    timeout: Option<i64>,
}

pub async fn open_store(engine_config: &EngineConfig) -> Result<Arc<dyn JobStore>> {
    let store = SqliteJobStore::connect(&engine_config.db_path)
        .await
        .with_context(|| format!("opening database at {}", engine_config.db_path))?;
    Ok(Arc::new(store))
}

pub async fn enqueue(store: &Arc<dyn JobStore>, engine_config: &EngineConfig, job_json: &str) -> Result<()> {
    let payload: EnqueuePayload =
        serde_json::from_str(job_json).context("invalid JSON format")?;

    let job = Job::new(
        payload.id.clone(),
        payload.command,
        payload.max_retries.unwrap_or(engine_config.max_retries),
        payload.priority,
        payload.run_at,
        payload.timeout.or(Some(engine_config.default_timeout)),
    );

    match store.insert(job.clone()).await {
        Ok(()) => {
            println!("Job '{}' enqueued successfully", job.id);
            println!("  Command: {}", job.command);
            println!("  State: {}", job.state);
            println!("  Max Retries: {}", job.max_retries);
            Ok(())
        }
        Err(relayq_core::error::StoreError::Duplicate(id)) => {
            bail!("Job '{id}' already exists")
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn status(store: &Arc<dyn JobStore>, metrics: &ExecutionMetrics) -> Result<()> {
    let stats = store.stats().await?;

    println!("=== relayq Status ===\n");
    println!("Job Statistics:");
    println!("  Pending: {}", stats.pending);
    println!("  Processing: {}", stats.processing);
    println!("  Completed: {}", stats.completed);
    println!("  Failed: {}", stats.failed);
    println!("  Dead: {}", stats.dead);
    println!("\nTotal Jobs: {}", stats.total);

    let exec_stats = metrics.stats();
    if exec_stats.total_executions > 0 {
        println!("\nExecution Metrics:");
        println!("  Total Executions: {}", exec_stats.total_executions);
        println!("  Avg Execution Time: {:.2}s", exec_stats.avg_execution_secs);
        println!("  Min Execution Time: {:.2}s", exec_stats.min_execution_secs);
        println!("  Max Execution Time: {:.2}s", exec_stats.max_execution_secs);
    }

    Ok(())
}

pub async fn list(store: &Arc<dyn JobStore>, state: Option<JobStateArg>, limit: i64) -> Result<()> {
    let jobs = store.list(state.map(JobState::from), limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!("=== Jobs ({} shown) ===", jobs.len());
    for job in jobs {
        print_job(&job);
    }
    Ok(())
}

pub async fn dlq_list(store: &Arc<dyn JobStore>) -> Result<()> {
    let jobs = store.list(Some(JobState::Dead), i64::MAX).await?;

    if jobs.is_empty() {
        println!("Dead Letter Queue is empty");
        return Ok(());
    }

    println!("=== Dead Letter Queue ({} jobs) ===", jobs.len());
    for job in jobs {
        print_job(&job);
    }
    Ok(())
}

pub async fn dlq_retry(store: &Arc<dyn JobStore>, job_id: &str) -> Result<()> {
    match store.reset_from_dlq(job_id).await? {
        Some(job) => {
            println!("Job '{job_id}' reset to pending state");
            println!("  Command: {}", job.command);
            println!("  Attempts reset to 0");
            Ok(())
        }
        None => bail!("Job '{job_id}' not found in DLQ or cannot be reset"),
    }
}

pub fn config_set(config: &mut ConfigStore, key: &str, raw_value: &str) -> Result<()> {
    let normalized = crate::config::normalize_key(key);
    let value = crate::config::coerce(&normalized, raw_value)?;
    config.set(normalized, value)?;
    println!("Configuration '{key}' set to '{raw_value}'");
    Ok(())
}

pub fn config_show(config: &ConfigStore) -> Result<()> {
    println!("=== Configuration ===");
    for (key, value) in config.all() {
        println!("  {key}: {value}");
    }
    Ok(())
}

/// Jobs left `processing` for longer than this are assumed to belong to a
/// worker process that crashed mid-execution, not one still running a long
/// command.
const STALE_PROCESSING_THRESHOLD: chrono::Duration = chrono::Duration::minutes(5);

/// Start `count` workers and block until an interrupt or terminate signal
/// tells the pool to shut down, matching the original's non-daemon-thread
/// process lifetime: `relayq worker start` stays in the foreground.
///
/// Before spawning any worker, sweeps jobs stuck `processing` from a prior
/// crash back to `pending` (or `dead`, if they've exhausted their retries).
pub async fn worker_start(engine_config: &EngineConfig, count: u32) -> Result<()> {
    if count < 1 {
        bail!("Worker count must be at least 1");
    }

    let sqlite_store = SqliteJobStore::connect(&engine_config.db_path)
        .await
        .with_context(|| format!("opening database at {}", engine_config.db_path))?;
    let reclaimed = sqlite_store
        .reclaim_stale(STALE_PROCESSING_THRESHOLD)
        .await?;
    if reclaimed > 0 {
        println!("Reclaimed {reclaimed} stale processing job(s)");
    }
    let store: Arc<dyn JobStore> = Arc::new(sqlite_store);

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        SchedulerPolicy {
            backoff_base: engine_config.backoff_base,
        },
    ));
    let executor = Arc::new(Executor::new(engine_config.default_timeout));
    let metrics = Arc::new(ExecutionMetrics::new());
    let pool = WorkerPool::new(
        store,
        scheduler,
        executor,
        metrics,
        Duration::from_secs(engine_config.worker_poll_interval),
    );

    pool.start(count).await;
    println!("Started {count} worker(s). Press Ctrl+C to stop.");

    pool.clone().install_signal_handlers(Duration::from_secs(10));
    std::future::pending::<()>().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::EnqueuePayload;

    #[test]
    fn enqueue_payload_rejects_unknown_fields() {
        let json = r#"{"id": "a", "command": "echo hi", "bogus": true}"#;
        let err = serde_json::from_str::<EnqueuePayload>(json).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn enqueue_payload_accepts_known_fields_only() {
        let json = r#"{"id": "a", "command": "echo hi", "priority": 2}"#;
        let payload: EnqueuePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.id, "a");
        assert_eq!(payload.priority, 2);
    }
}

fn print_job(job: &Job) {
    println!("\nJob ID: {}", job.id);
    println!("  Command: {}", job.command);
    println!("  State: {}", job.state);
    println!("  Attempts: {}/{}", job.attempts, job.max_retries);
    println!("  Priority: {}", job.priority);
    println!("  Created: {}", job.created_at);
    if let Some(error) = &job.error {
        println!("  Error: {error}");
    }
    if let Some(next_retry_at) = &job.next_retry_at {
        println!("  Next Retry: {next_retry_at}");
    }
}
