//! Fieldsync CLI - capture inspection records offline and sync them later
//!
//! A terminal host for the sync engine: write reports and task updates
//! without a network, then reconcile them with the records API.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ReportCommands, TaskCommands};
use crate::commands::common::{open_engine, EngineOptions};
use crate::commands::report::{run_report_add, run_report_list, run_report_promote, NewReport};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::task::{run_task_list, run_task_status};
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

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = EngineOptions::from_cli(&cli);
    let engine = open_engine(&options).await?;

    match cli.command {
        Commands::Report { command } => match command {
            ReportCommands::Add {
                title,
                description,
                draft,
                media,
            } => {
                let input = NewReport {
                    title,
                    description,
                    draft,
                    media,
                };
                run_report_add(&engine, input).await?;
            }
            ReportCommands::List { limit, json } => run_report_list(&engine, limit, json).await?,
            ReportCommands::Promote { id } => run_report_promote(&engine, &id).await?,
        },
        Commands::Task { command } => match command {
            TaskCommands::List { limit, json } => run_task_list(&engine, limit, json).await?,
            TaskCommands::Status { id, status } => run_task_status(&engine, &id, &status).await?,
        },
        Commands::Sync { kind } => run_sync(&engine, kind.map(Into::into)).await?,
        Commands::Status { json } => run_status(&engine, json).await?,
        Commands::Watch { probe_interval } => run_watch(&engine, probe_interval).await?,
    }

    Ok(())
}
