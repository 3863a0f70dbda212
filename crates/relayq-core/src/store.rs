//! The durable, concurrency-safe job repository contract.
//!
//! `JobStore` is the single source of truth (spec.md §4.1): every state
//! transition is a store operation, and the store is the serialisation point
//! for concurrent workers. `claim_pending` and `release_retryable` must be
//! implemented as a single conditional update at the storage layer — never
//! as a read-then-write from application code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{Job, JobState};

/// Aggregate counts of jobs per state, plus the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
    pub total: i64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::Duplicate`] if `id` already exists.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Fetch the current record for `id`, or [`StoreError::NotFound`].
    async fn get(&self, id: &str) -> Result<Job, StoreError>;

    /// Unconditional full-record update by id. Fails with [`StoreError::NotFound`]
    /// if absent. Callers needing conditional semantics use the atomic
    /// transitions below instead.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomically select and claim one `pending` job that is due (`run_at`
    /// absent or in the past), ordered by `priority DESC, created_at ASC`.
    /// Returns `None` if no candidate exists. Serialisable against
    /// concurrent `claim_pending`/`release_retryable` calls on the same row.
    async fn claim_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Atomic compare-and-set: if the job is `failed` with a due
    /// `next_retry_at`, set it `pending` and clear `next_retry_at`. Returns
    /// whether the transition occurred.
    async fn release_retryable(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// All `failed` jobs whose `next_retry_at` is due, oldest-retry-first.
    /// Read-only, not a claim.
    async fn list_retryable_ready(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    /// Newest-first by `created_at`, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Count of jobs per state plus total.
    async fn stats(&self) -> Result<JobStats, StoreError>;

    /// If `id` is `dead`, reset it to `pending` with `attempts = 0` and
    /// `error`/`next_retry_at` cleared; returns the new record. Otherwise
    /// returns `None`.
    async fn reset_from_dlq(&self, id: &str) -> Result<Option<Job>, StoreError>;
}

/// Test-only stand-ins: an in-memory [`JobStore`] for exercising the
/// scheduler/worker/pool against the same contract a real backend must
/// satisfy, without paying for file or network I/O. Gated behind the
/// `test-support` feature so integration tests in other crates (and this
/// crate's own `tests/`) can use it too.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub struct NullStore;

    #[async_trait]
    impl JobStore for NullStore {
        async fn insert(&self, _job: Job) -> Result<(), StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn get(&self, _id: &str) -> Result<Job, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn update(&self, _job: &Job) -> Result<(), StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn claim_pending(&self, _now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn release_retryable(
            &self,
            _id: &str,
            _now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn list_retryable_ready(&self, _now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn list(
            &self,
            _state: Option<JobState>,
            _limit: i64,
        ) -> Result<Vec<Job>, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn stats(&self) -> Result<JobStats, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
        async fn reset_from_dlq(&self, _id: &str) -> Result<Option<Job>, StoreError> {
            unimplemented!("NullStore is for pure-logic tests only")
        }
    }

    /// A `Mutex<Vec<Job>>`-backed store. The mutex is the whole critical
    /// section, same role as SQLite's single-writer lock or Postgres's row
    /// lock in the real backends — `claim_pending` takes the lock, picks a
    /// row, flips its state, and releases, all without ever handing out two
    /// workers the same row.
    #[derive(Default)]
    pub struct InMemoryStore {
        jobs: Mutex<Vec<Job>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl JobStore for InMemoryStore {
        async fn insert(&self, job: Job) -> Result<(), StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(StoreError::Duplicate(job.id));
            }
            jobs.push(job);
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Job, StoreError> {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .find(|j| j.id == id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        }

        async fn update(&self, job: &Job) -> Result<(), StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            let slot = jobs
                .iter_mut()
                .find(|j| j.id == job.id)
                .ok_or_else(|| StoreError::NotFound(job.id.clone()))?;
            *slot = job.clone();
            Ok(())
        }

        async fn claim_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut candidates: Vec<usize> = jobs
                .iter()
                .enumerate()
                .filter(|(_, j)| j.state == JobState::Pending && j.is_due(now))
                .map(|(i, _)| i)
                .collect();
            candidates.sort_by(|&a, &b| {
                jobs[b]
                    .priority
                    .cmp(&jobs[a].priority)
                    .then(jobs[a].created_at.cmp(&jobs[b].created_at))
            });
            match candidates.into_iter().next() {
                Some(idx) => {
                    jobs[idx].state = JobState::Processing;
                    jobs[idx].updated_at = now;
                    Ok(Some(jobs[idx].clone()))
                }
                None => Ok(None),
            }
        }

        async fn release_retryable(
            &self,
            id: &str,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                let eligible = job.state == JobState::Failed
                    && job.next_retry_at.is_some_and(|t| t <= now);
                if eligible {
                    job.state = JobState::Pending;
                    job.next_retry_at = None;
                    job.updated_at = now;
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn list_retryable_ready(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
            let jobs = self.jobs.lock().unwrap();
            let mut ready: Vec<Job> = jobs
                .iter()
                .filter(|j| {
                    j.state == JobState::Failed
                        && j.next_retry_at.is_some_and(|t| t <= now)
                })
                .cloned()
                .collect();
            ready.sort_by_key(|j| j.next_retry_at);
            Ok(ready)
        }

        async fn list(
            &self,
            state: Option<JobState>,
            limit: i64,
        ) -> Result<Vec<Job>, StoreError> {
            let jobs = self.jobs.lock().unwrap();
            let mut matching: Vec<Job> = jobs
                .iter()
                .filter(|j| match state {
                    Some(s) => j.state == s,
                    None => true,
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            matching.truncate(limit.max(0) as usize);
            Ok(matching)
        }

        async fn stats(&self) -> Result<JobStats, StoreError> {
            let jobs = self.jobs.lock().unwrap();
            let mut stats = JobStats::default();
            for job in jobs.iter() {
                match job.state {
                    JobState::Pending => stats.pending += 1,
                    JobState::Processing => stats.processing += 1,
                    JobState::Completed => stats.completed += 1,
                    JobState::Failed => stats.failed += 1,
                    JobState::Dead => stats.dead += 1,
                }
                stats.total += 1;
            }
            Ok(stats)
        }

        async fn reset_from_dlq(&self, id: &str) -> Result<Option<Job>, StoreError> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                if job.state == JobState::Dead {
                    job.state = JobState::Pending;
                    job.attempts = 0;
                    job.error = None;
                    job.next_retry_at = None;
                    job.updated_at = Utc::now();
                    return Ok(Some(job.clone()));
                }
            }
            Ok(None)
        }
    }
}
