//! Job record and state definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five states a job can be in over its lifetime.
///
/// `Pending -> Processing -> {Completed | Failed -> Pending (retry) | Dead}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// A durable job record.
///
/// Field semantics are normative — see the store module for the atomic
/// transitions that are the only legal way to mutate a job's `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    /// Number of completed execution attempts. Incremented once per failure.
    pub attempts: i64,
    /// The job may be attempted at most `max_retries + 1` times total.
    pub max_retries: i64,
    /// Higher values run first.
    pub priority: i64,
    pub run_at: Option<DateTime<Utc>>,
    /// Per-job timeout override, in seconds. Absent means use the engine default.
    pub timeout: Option<i64>,
    pub output: Option<String>,
    pub error: Option<String>,
    /// Set only while `state == Failed`; cleared on any transition out of Failed.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a new pending job from caller-supplied enqueue fields.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        max_retries: i64,
        priority: i64,
        run_at: Option<DateTime<Utc>>,
        timeout: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            priority,
            run_at,
            timeout,
            output: None,
            error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this job is eligible to be claimed right now, ignoring state.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.run_at {
            Some(run_at) => run_at <= now,
            None => true,
        }
    }
}
