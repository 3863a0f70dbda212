//! Pure policy layer: which job runs next, how long to back off, and
//! whether a failure is retried or promoted to the dead-letter queue.
//!
//! Holds no mutable state of its own beyond a handle to the store and the
//! configured policy knobs — every call re-reads whatever it needs from the
//! store. See spec.md §4.3.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::MAX_BACKOFF_SECS;
use crate::error::StoreError;
use crate::executor::ExecutionOutcome;
use crate::job::{Job, JobState};
use crate::store::JobStore;

/// Policy knobs the scheduler needs. A subset of [`crate::config::EngineConfig`]
/// so the scheduler doesn't depend on the full config surface (e.g. `db_path`,
/// `log_dir` are meaningless to it).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerPolicy {
    pub backoff_base: f64,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            backoff_base: crate::config::DEFAULT_BACKOFF_BASE,
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    policy: SchedulerPolicy,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, policy: SchedulerPolicy) -> Self {
        Self { store, policy }
    }

    /// Compute the exponential backoff delay for a job that has just failed
    /// for the `attempts`-th time (attempts taken *after* increment).
    /// `seconds = floor(base ^ attempts)`, clamped to `[1, MAX_BACKOFF_SECS]`.
    pub fn backoff(&self, attempts: i64) -> i64 {
        let base = self.policy.backoff_base.max(1.0);
        let raw = base.powi(attempts.max(0) as i32);
        if !raw.is_finite() || raw > MAX_BACKOFF_SECS as f64 {
            return MAX_BACKOFF_SECS;
        }
        (raw.floor() as i64).clamp(1, MAX_BACKOFF_SECS)
    }

    /// Find the next job ready to run, without claiming it.
    ///
    /// First drains `list_retryable_ready`, attempting `release_retryable` on
    /// each candidate in priority-of-discovery order until one succeeds
    /// (returning the freshly-reloaded, now-`Pending` job). If none succeed
    /// or the list is empty, describes (but does not claim) a pending
    /// candidate — the worker performs the actual atomic claim so it can
    /// attribute the claim to itself.
    pub async fn pick_next(&self) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();

        for candidate in self.store.list_retryable_ready(now).await? {
            if self.store.release_retryable(&candidate.id, now).await? {
                return Ok(Some(self.store.get(&candidate.id).await?));
            }
            // Another worker won the race on this one; try the next candidate.
        }

        self.pending_candidate(now).await
    }

    /// Describe (without claiming) the best pending candidate, if any.
    async fn pending_candidate(&self, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut pending: Vec<Job> = self
            .store
            .list(Some(JobState::Pending), i64::MAX)
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(pending.into_iter().next())
    }

    /// Apply the outcome of an execution to a claimed (`Processing`) job and
    /// persist the resulting transition.
    pub async fn finalize(
        &self,
        mut job: Job,
        outcome: ExecutionOutcome,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        job.output = Some(outcome.output);
        job.updated_at = now;

        if outcome.success {
            job.state = JobState::Completed;
            job.error = None;
            job.next_retry_at = None;
        } else {
            job.attempts += 1;
            let message = outcome.error.unwrap_or_else(|| "Job failed".to_string());
            if job.attempts < job.max_retries {
                job.state = JobState::Failed;
                job.next_retry_at = Some(now + chrono::Duration::seconds(self.backoff(job.attempts)));
                job.error = Some(message);
            } else {
                job.state = JobState::Dead;
                job.next_retry_at = None;
                job.error = Some(if message.is_empty() {
                    "Max retries exceeded".to_string()
                } else {
                    message
                });
            }
        }

        self.store.update(&job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_is_non_decreasing() {
        let scheduler = Scheduler::new(
            Arc::new(crate::store::test_support::NullStore),
            SchedulerPolicy { backoff_base: 2.0 },
        );
        let mut last = 0;
        for attempts in 1..10 {
            let delay = scheduler.backoff(attempts);
            assert!(delay >= last);
            assert_eq!(delay, 2i64.pow(attempts as u32));
            last = delay;
        }
    }

    #[test]
    fn backoff_is_capped_not_overflowed() {
        let scheduler = Scheduler::new(
            Arc::new(crate::store::test_support::NullStore),
            SchedulerPolicy { backoff_base: 2.0 },
        );
        assert_eq!(scheduler.backoff(63), MAX_BACKOFF_SECS);
        assert_eq!(scheduler.backoff(1000), MAX_BACKOFF_SECS);
    }

    #[test]
    fn backoff_has_a_minimum_of_one_second() {
        let scheduler = Scheduler::new(
            Arc::new(crate::store::test_support::NullStore),
            SchedulerPolicy { backoff_base: 2.0 },
        );
        assert_eq!(scheduler.backoff(0), 1);
    }

    use crate::store::test_support::InMemoryStore;

    fn scheduler_with_memory_store() -> (Scheduler, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), SchedulerPolicy { backoff_base: 2.0 });
        (scheduler, store)
    }

    #[tokio::test]
    async fn finalize_on_success_marks_completed() {
        let (scheduler, store) = scheduler_with_memory_store();
        let job = Job::new("a", "echo hi", 3, 0, None, None);
        store.insert(job.clone()).await.unwrap();

        let outcome = ExecutionOutcome {
            success: true,
            output: "hi\n".to_string(),
            error: None,
        };
        let finalized = scheduler.finalize(job, outcome).await.unwrap();
        assert_eq!(finalized.state, JobState::Completed);
        assert_eq!(finalized.attempts, 0);
        assert_eq!(finalized.output.as_deref(), Some("hi\n"));
    }

    #[tokio::test]
    async fn finalize_retries_until_max_then_dies() {
        let (scheduler, store) = scheduler_with_memory_store();
        let mut job = Job::new("b", "exit 1", 2, 0, None, None);
        store.insert(job.clone()).await.unwrap();

        let failure = || ExecutionOutcome {
            success: false,
            output: String::new(),
            error: Some("boom".to_string()),
        };

        job = scheduler.finalize(job, failure()).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert!(job.next_retry_at.is_some());

        job = scheduler.finalize(job, failure()).await.unwrap();
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 2);
        assert!(job.next_retry_at.is_none());
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn pick_next_prefers_due_retryable_jobs_over_pending() {
        let (scheduler, store) = scheduler_with_memory_store();

        let mut retryable = Job::new("retry-me", "echo r", 3, 0, None, None);
        retryable.state = JobState::Failed;
        retryable.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.insert(retryable).await.unwrap();

        let pending = Job::new("pending-me", "echo p", 3, 0, None, None);
        store.insert(pending).await.unwrap();

        let picked = scheduler.pick_next().await.unwrap().unwrap();
        assert_eq!(picked.id, "retry-me");
        assert_eq!(picked.state, JobState::Pending);
    }

    #[tokio::test]
    async fn pick_next_orders_pending_by_priority_then_age() {
        let (scheduler, store) = scheduler_with_memory_store();

        let low = Job::new("low", "echo l", 3, 0, None, None);
        store.insert(low).await.unwrap();
        let high = Job::new("high", "echo h", 3, 5, None, None);
        store.insert(high).await.unwrap();

        let picked = scheduler.pick_next().await.unwrap().unwrap();
        assert_eq!(picked.id, "high");
    }

    #[tokio::test]
    async fn pick_next_skips_scheduled_jobs_not_yet_due() {
        let (scheduler, store) = scheduler_with_memory_store();
        let future = Utc::now() + chrono::Duration::seconds(60);
        let job = Job::new("later", "echo x", 3, 0, Some(future), None);
        store.insert(job).await.unwrap();

        assert!(scheduler.pick_next().await.unwrap().is_none());
    }
}
