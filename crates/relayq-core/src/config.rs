//! Engine-level configuration.
//!
//! This is the plain settings struct consumed by [`crate::scheduler::Scheduler`]
//! and [`crate::executor::Executor`]. Reading it from a file, merging it with
//! defaults, and persisting edits back to disk is the job of the CLI crate's
//! configuration loader (an external collaborator per spec.md §1) — the core
//! engine never touches the filesystem for its own settings.

use serde::{Deserialize, Serialize};

/// Default retry budget per job when the enqueue payload omits `max_retries`.
pub const DEFAULT_MAX_RETRIES: i64 = 3;
/// Default base of the exponential backoff.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
/// Default per-job execution ceiling, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i64 = 300;
/// Default idle poll period, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
/// Upper bound on any computed backoff delay, in seconds (one day).
pub const MAX_BACKOFF_SECS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_retries: i64,
    pub backoff_base: f64,
    pub default_timeout: i64,
    pub worker_poll_interval: u64,
    pub db_path: String,
    pub log_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            default_timeout: DEFAULT_TIMEOUT_SECS,
            worker_poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            db_path: "relayq.db".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}
