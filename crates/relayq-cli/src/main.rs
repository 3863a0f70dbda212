mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command, ConfigCommand, DlqCommand, WorkerCommand};
use config::ConfigStore;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ConfigStore::default_path()?,
    };
    let mut config = ConfigStore::load(&config_path)?;
    let engine_config = config.engine_config()?;

    let _logging_guard = logging::init(&engine_config.log_dir)?;

    match cli.command {
        Command::Enqueue { job_json } => {
            let store = commands::open_store(&engine_config).await?;
            commands::enqueue(&store, &engine_config, &job_json).await
        }
        Command::Worker(WorkerCommand::Start { count }) => {
            commands::worker_start(&engine_config, count).await
        }
        Command::Worker(WorkerCommand::Stop) => {
            println!(
                "relayq runs workers in the foreground of their own `worker start` process; \
                 stop it with Ctrl+C or SIGTERM on that process instead."
            );
            Ok(())
        }
        Command::Status => {
            let store = commands::open_store(&engine_config).await?;
            let metrics = relayq_core::metrics::ExecutionMetrics::new();
            commands::status(&store, &metrics).await
        }
        Command::List { state, limit } => {
            let store = commands::open_store(&engine_config).await?;
            commands::list(&store, state, limit).await
        }
        Command::Dlq(DlqCommand::List) => {
            let store = commands::open_store(&engine_config).await?;
            commands::dlq_list(&store).await
        }
        Command::Dlq(DlqCommand::Retry { job_id }) => {
            let store = commands::open_store(&engine_config).await?;
            commands::dlq_retry(&store, &job_id).await
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            commands::config_set(&mut config, &key, &value)
        }
        Command::Config(ConfigCommand::Show) => commands::config_show(&config),
    }
}
