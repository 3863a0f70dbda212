//! Console plus daily-rolling-file tracing setup.
//!
//! Grounded on `nx-playground`'s `init_tracing`: an `EnvFilter` that respects
//! `RUST_LOG` when set, falling back to a sane per-environment default, with
//! a second non-blocking writer fanned out to a rotating file via
//! `tracing-appender` so `worker start` output survives after the terminal
//! is gone.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Must be kept alive for the lifetime of the process; dropping it stops the
/// background flush thread for the file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_dir: &str) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {log_dir}"))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "relayq.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .try_init()
        .ok();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
