//! SQLite-backed [`relayq_core::store::JobStore`].
//!
//! Grounded on `seesaw-job-postgres`'s `PgJobStore`: a single connection pool,
//! one table, and the claim/release transitions expressed as a single
//! conditional `UPDATE ... RETURNING` rather than a read-then-write from
//! application code. SQLite has no `FOR UPDATE SKIP LOCKED`; its single
//! writer at a time, serialized through WAL mode and a busy timeout, gives
//! the same safety property — only one connection can be mid-`UPDATE`
//! against the `jobs` table at once, so the `WHERE id = (SELECT ...)`
//! subquery and the row it touches are always consistent.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relayq_core::error::StoreError;
use relayq_core::job::{Job, JobState};
use relayq_core::store::{JobStats, JobStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    priority: i64,
    run_at: Option<DateTime<Utc>>,
    timeout: Option<i64>,
    output: Option<String>,
    error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = JobState::from_str(&row.state)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(Job {
            id: row.id,
            command: row.command,
            state,
            attempts: row.attempts,
            max_retries: row.max_retries,
            priority: row.priority,
            run_at: row.run_at,
            timeout: row.timeout,
            output: row.output,
            error: row.error,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A SQLite-backed job store. One file, one pool, one table.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if absent) the database at `path`, enable WAL mode and
    /// a busy timeout so concurrent readers don't trip over the single
    /// writer, and ensure the schema exists.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Build directly from an already-configured pool (tests, or a caller
    /// that wants its own connection options).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                max_retries INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                run_at TEXT,
                timeout INTEGER,
                output TEXT,
                error TEXT,
                next_retry_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs (state)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (state, priority DESC, created_at ASC)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_retry ON jobs (state, next_retry_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Jobs stuck `processing` for longer than `staleness` — almost always
    /// the result of a crash that took the process down mid-execution, since
    /// spec.md resolves crash recovery as "on startup, sweep `processing`
    /// rows older than a staleness threshold back to `pending`" rather than
    /// tracking per-job leases. Counts as a failed attempt, so a job that
    /// keeps crashing its worker still reaches the dead-letter queue instead
    /// of being retried forever.
    pub async fn reclaim_stale(&self, staleness: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - staleness;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                state = CASE WHEN attempts + 1 >= max_retries THEN 'dead' ELSE 'pending' END,
                error = CASE WHEN attempts + 1 >= max_retries
                             THEN COALESCE(error, 'Max retries exceeded')
                             ELSE error END,
                next_retry_at = NULL,
                updated_at = ?
            WHERE state = 'processing' AND updated_at <= ?
            "#,
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries, priority,
                run_at, timeout, output, error, next_retry_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.timeout)
        .bind(&job.output)
        .bind(&job.error)
        .bind(job.next_retry_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Duplicate(job.id))
            }
            Err(err) => Err(StoreError::Backend(err.into())),
        }
    }

    async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.try_into()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                command = ?, state = ?, attempts = ?, max_retries = ?, priority = ?,
                run_at = ?, timeout = ?, output = ?, error = ?, next_retry_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.command)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.timeout)
        .bind(&job.output)
        .bind(&job.error)
        .bind(job.next_retry_at)
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id.clone()));
        }
        Ok(())
    }

    async fn claim_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'processing', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?)
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn release_retryable(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', next_retry_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_retryable_ready(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?
            ORDER BY next_retry_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list(&self, state: Option<JobState>, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Backend(e.into()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT state, COUNT(*) as n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut stats = JobStats::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(|e| StoreError::Backend(e.into()))?;
            let n: i64 = row.try_get("n").map_err(|e| StoreError::Backend(e.into()))?;
            match state.as_str() {
                "pending" => stats.pending = n,
                "processing" => stats.processing = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                "dead" => stats.dead = n,
                _ => {}
            }
            stats.total += n;
        }
        Ok(stats)
    }

    async fn reset_from_dlq(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, error = NULL, next_retry_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'dead'
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        row.map(TryInto::try_into).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::job::Job;

    async fn test_store() -> SqliteJobStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteJobStore::from_pool(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = test_store().await;
        let job = Job::new("a", "echo hi", 3, 0, None, None);
        store.insert(job.clone()).await.unwrap();
        let fetched = store.get("a").await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.command, job.command);
        assert_eq!(fetched.state, JobState::Pending);
    }

    #[tokio::test]
    async fn insert_duplicate_id_is_rejected() {
        let store = test_store().await;
        let job = Job::new("dup", "echo hi", 3, 0, None, None);
        store.insert(job.clone()).await.unwrap();
        let err = store.insert(job).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "dup"));
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = test_store().await;
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn claim_pending_picks_highest_priority_oldest_due_job() {
        let store = test_store().await;
        store
            .insert(Job::new("low", "echo l", 3, 0, None, None))
            .await
            .unwrap();
        store
            .insert(Job::new("high", "echo h", 3, 5, None, None))
            .await
            .unwrap();

        let claimed = store.claim_pending(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, "high");
        assert_eq!(claimed.state, JobState::Processing);

        // The claimed row no longer shows up as a pending candidate.
        let next = store.claim_pending(Utc::now()).await.unwrap().unwrap();
        assert_eq!(next.id, "low");
    }

    #[tokio::test]
    async fn claim_pending_skips_jobs_not_yet_due() {
        let store = test_store().await;
        let future = Utc::now() + chrono::Duration::seconds(60);
        store
            .insert(Job::new("later", "echo x", 3, 0, Some(future), None))
            .await
            .unwrap();

        assert!(store.claim_pending(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_retryable_only_fires_once() {
        let store = test_store().await;
        let mut job = Job::new("r", "echo r", 3, 0, None, None);
        job.state = JobState::Failed;
        job.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.insert(job).await.unwrap();

        let now = Utc::now();
        assert!(store.release_retryable("r", now).await.unwrap());
        assert!(!store.release_retryable("r", now).await.unwrap());

        let reloaded = store.get("r").await.unwrap();
        assert_eq!(reloaded.state, JobState::Pending);
        assert!(reloaded.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn reset_from_dlq_only_affects_dead_jobs() {
        let store = test_store().await;
        let mut job = Job::new("d", "echo d", 3, 0, None, None);
        job.state = JobState::Dead;
        job.attempts = 3;
        job.error = Some("boom".to_string());
        store.insert(job).await.unwrap();

        let reset = store.reset_from_dlq("d").await.unwrap().unwrap();
        assert_eq!(reset.state, JobState::Pending);
        assert_eq!(reset.attempts, 0);
        assert!(reset.error.is_none());

        assert!(store.reset_from_dlq("d").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_counts_every_state() {
        let store = test_store().await;
        store
            .insert(Job::new("p", "echo p", 3, 0, None, None))
            .await
            .unwrap();
        let mut done = Job::new("c", "echo c", 3, 0, None, None);
        done.state = JobState::Completed;
        store.insert(done).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn reclaim_stale_resets_abandoned_processing_jobs() {
        let store = test_store().await;
        let mut job = Job::new("stuck", "echo s", 3, 0, None, None);
        job.state = JobState::Processing;
        job.updated_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert(job).await.unwrap();

        let reclaimed = store.reclaim_stale(chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let job = store.get("stuck").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn reclaim_stale_dead_letters_a_job_that_exhausted_its_retries() {
        let store = test_store().await;
        let mut job = Job::new("crash-loop", "echo s", 1, 0, None, None);
        job.state = JobState::Processing;
        job.attempts = 1;
        job.updated_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert(job).await.unwrap();

        let reclaimed = store.reclaim_stale(chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let job = store.get("crash-loop").await.unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error.as_deref(), Some("Max retries exceeded"));
    }

    #[tokio::test]
    async fn reclaim_stale_ignores_jobs_not_yet_stale() {
        let store = test_store().await;
        let mut job = Job::new("fresh", "echo s", 3, 0, None, None);
        job.state = JobState::Processing;
        job.updated_at = Utc::now();
        store.insert(job).await.unwrap();

        let reclaimed = store.reclaim_stale(chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(reclaimed, 0);

        let job = store.get("fresh").await.unwrap();
        assert_eq!(job.state, JobState::Processing);
    }
}
