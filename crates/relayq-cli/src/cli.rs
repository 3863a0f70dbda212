//! Command-line surface, grounded on `queuectl/cli.py`'s command table and
//! following the teacher's derive style (`clap::Parser` / `clap::Subcommand`
//! structs, doc comments doubling as `--help` text).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "relayq", version, about = "Persistent background job queue")]
pub struct Cli {
    /// Path to the JSON config file. Defaults to ~/.relayq/config.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enqueue a new job from a JSON payload.
    ///
    /// JOB_JSON must contain at least `id` and `command`; `max_retries`,
    /// `priority`, `run_at` (RFC 3339), and `timeout` are optional.
    Enqueue {
        /// JSON object describing the job, e.g. '{"id":"j1","command":"echo hi"}'.
        job_json: String,
    },

    /// Manage worker processes.
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show a summary of job states, active workers, and execution metrics.
    Status,

    /// List jobs, optionally filtered by state.
    List {
        #[arg(long, value_enum)]
        state: Option<JobStateArg>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Manage the dead-letter queue.
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start worker processes. Blocks, running workers until interrupted.
    Start {
        /// Number of workers to start.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Stop all running workers gracefully. Meaningful only against a
    /// `worker start` running in the same process; kept for symmetry with
    /// the original command table.
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List all jobs currently in the dead-letter queue.
    List,

    /// Reset a dead-lettered job back to pending for another attempt.
    Retry {
        job_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Set a configuration value.
    Set { key: String, value: String },

    /// Show the current configuration.
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum JobStateArg {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl From<JobStateArg> for relayq_core::job::JobState {
    fn from(arg: JobStateArg) -> Self {
        match arg {
            JobStateArg::Pending => relayq_core::job::JobState::Pending,
            JobStateArg::Processing => relayq_core::job::JobState::Processing,
            JobStateArg::Completed => relayq_core::job::JobState::Completed,
            JobStateArg::Failed => relayq_core::job::JobState::Failed,
            JobStateArg::Dead => relayq_core::job::JobState::Dead,
        }
    }
}
