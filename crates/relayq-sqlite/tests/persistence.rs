//! Jobs survive a process restart: reopening the same database file picks up
//! exactly where the previous connection left off (spec.md §9, "state is
//! durable across restarts").

use chrono::Utc;
use relayq_core::job::{Job, JobState};
use relayq_core::store::JobStore;
use relayq_sqlite::SqliteJobStore;

#[tokio::test]
async fn jobs_survive_a_reopen_of_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("relayq.db");

    {
        let store = SqliteJobStore::connect(&db_path).await.unwrap();
        store
            .insert(Job::new("a", "echo hi", 3, 0, None, None))
            .await
            .unwrap();
        let claimed = store.claim_pending(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, "a");
    }

    // Drop the first store (closing its pool) and reopen against the same file.
    let store = SqliteJobStore::connect(&db_path).await.unwrap();
    let job = store.get("a").await.unwrap();
    assert_eq!(job.state, JobState::Processing);
}

#[tokio::test]
async fn dlq_retry_resets_a_dead_job_to_pending() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("relayq.db");
    let store = SqliteJobStore::connect(&db_path).await.unwrap();

    let mut job = Job::new("d", "exit 1", 1, 0, None, None);
    job.state = JobState::Dead;
    job.attempts = 1;
    job.error = Some("Max retries exceeded".to_string());
    store.insert(job).await.unwrap();

    let reset = store.reset_from_dlq("d").await.unwrap().unwrap();
    assert_eq!(reset.state, JobState::Pending);
    assert_eq!(reset.attempts, 0);

    let claimed = store.claim_pending(Utc::now()).await.unwrap();
    assert!(claimed.is_some());
}

#[tokio::test]
async fn reclaim_stale_runs_cleanly_against_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("relayq.db");
    let store = SqliteJobStore::connect(&db_path).await.unwrap();

    let mut job = Job::new("stuck", "echo s", 3, 0, None, None);
    job.state = JobState::Processing;
    job.updated_at = Utc::now() - chrono::Duration::seconds(300);
    store.insert(job).await.unwrap();

    let reclaimed = store
        .reclaim_stale(chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(reclaimed, 1);

    let job = store.get("stuck").await.unwrap();
    assert_eq!(job.state, JobState::Pending);
}
