//! LifeOS CLI - Terminal access to the offline sync engine
//!
//! Inspect and replay the local mutation queue, resolve entity conflicts and
//! follow the realtime invalidation stream.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::conflict::{run_conflict, run_resolve};
use crate::commands::daemon::run_daemon;
use crate::commands::queue::{
    run_queue_add, run_queue_clear, run_queue_drain, run_queue_list, run_queue_remove,
};
use crate::commands::send::run_send;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lifeos_core=info,lifeos=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = cli.api_overrides();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => run_queue_list(json, &db_path, &overrides).await?,
            QueueCommands::Add { mutation } => run_queue_add(&mutation, &db_path, &overrides).await?,
            QueueCommands::Drain {
                stop_on_error,
                json,
            } => run_queue_drain(stop_on_error, json, &db_path, &overrides).await?,
            QueueCommands::Remove { id } => run_queue_remove(&id, &db_path, &overrides).await?,
            QueueCommands::Clear => run_queue_clear(&db_path, &overrides).await?,
        },
        Commands::Send { mutation } => run_send(&mutation, &db_path, &overrides).await?,
        Commands::Resolve {
            local,
            server,
            strategy,
        } => run_resolve(&local, &server, strategy.into())?,
        Commands::Conflict { local, server } => run_conflict(&local, &server)?,
        Commands::Watch => run_watch(&overrides).await?,
        Commands::Run => run_daemon(&db_path, &overrides).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
