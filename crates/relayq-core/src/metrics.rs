//! In-process execution timing, lost on restart by design (spec.md §9:
//! "Execution timing is recorded in-process and lost on restart").
//!
//! Grounded on `queuectl/metrics.py`'s `Metrics` class: a start/end timestamp
//! pair per in-flight job, folded into a running count/min/max/avg on
//! completion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Summary statistics over every execution recorded so far.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub avg_execution_secs: f64,
    pub min_execution_secs: f64,
    pub max_execution_secs: f64,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            total_executions: 0,
            avg_execution_secs: 0.0,
            min_execution_secs: 0.0,
            max_execution_secs: 0.0,
        }
    }
}

#[derive(Default)]
struct Inner {
    starts: HashMap<String, Instant>,
    total: u64,
    sum_secs: f64,
    min_secs: f64,
    max_secs: f64,
}

/// Thread-safe execution timing collector, one instance shared across all
/// workers in a pool.
pub struct ExecutionMetrics {
    inner: Mutex<Inner>,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record that `job_id` started executing now.
    pub fn record_start(&self, job_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.starts.insert(job_id.to_string(), Instant::now());
    }

    /// Record that `job_id` finished (successfully or not). `success` is
    /// accepted for symmetry with the original source but execution time is
    /// tracked regardless of outcome.
    pub fn record_end(&self, job_id: &str, _success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(start) = inner.starts.remove(job_id) {
            let secs = start.elapsed().as_secs_f64();
            inner.total += 1;
            inner.sum_secs += secs;
            if inner.total == 1 {
                inner.min_secs = secs;
                inner.max_secs = secs;
            } else {
                inner.min_secs = inner.min_secs.min(secs);
                inner.max_secs = inner.max_secs.max(secs);
            }
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        let inner = self.inner.lock().unwrap();
        if inner.total == 0 {
            return ExecutionStats::default();
        }
        ExecutionStats {
            total_executions: inner.total,
            avg_execution_secs: inner.sum_secs / inner.total as f64,
            min_execution_secs: inner.min_secs,
            max_execution_secs: inner.max_secs,
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn empty_metrics_report_zeroes() {
        let metrics = ExecutionMetrics::new();
        assert_eq!(metrics.stats(), ExecutionStats::default());
    }

    #[test]
    fn records_a_single_execution() {
        let metrics = ExecutionMetrics::new();
        metrics.record_start("a");
        sleep(Duration::from_millis(5));
        metrics.record_end("a", true);

        let stats = metrics.stats();
        assert_eq!(stats.total_executions, 1);
        assert!(stats.avg_execution_secs > 0.0);
        assert_eq!(stats.min_execution_secs, stats.max_execution_secs);
    }

    #[test]
    fn end_without_start_is_ignored() {
        let metrics = ExecutionMetrics::new();
        metrics.record_end("never-started", false);
        assert_eq!(metrics.stats().total_executions, 0);
    }
}
