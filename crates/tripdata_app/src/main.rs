//! tripdata: fetch, load, clean and analyse monthly trip records.
//!
//! Commands:
//! - `ingest`: download every partition and rebuild the category tables
//! - `clean`: run the cleaning stages against each category table
//! - `analyze`: build the per-trip metrics tables and export them as CSV
//! - `all`: the three steps in order

mod commands;
mod config;
mod logging;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline_logging::{pipeline_fatal, pipeline_info};

#[derive(Parser)]
#[command(
    name = "tripdata",
    about = "Trip-data ingestion, cleaning and carbon analysis pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Download all partitions and rebuild the category tables.
    Ingest,
    /// Deduplicate and filter the category tables.
    Clean,
    /// Derive per-trip metrics, export CSV and log the carbon summary.
    Analyze,
    /// Ingest, clean and analyze in one run.
    All,
}

impl Commands {
    fn name(self) -> &'static str {
        match self {
            Commands::Ingest => "ingest",
            Commands::Clean => "clean",
            Commands::Analyze => "analyze",
            Commands::All => "all",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::initialize(cli.command.name());

    match run(cli.command) {
        Ok(()) => {
            pipeline_info!("{} completed", cli.command.name());
            ExitCode::SUCCESS
        }
        Err(err) => {
            pipeline_fatal!("{} aborted: {:#}", cli.command.name(), err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    let config = config::load(Path::new(config::CONFIG_FILENAME))?;
    match command {
        Commands::Ingest => commands::ingest(&config),
        Commands::Clean => commands::clean(&config),
        Commands::Analyze => commands::analyze(&config),
        Commands::All => commands::all(&config),
    }
}
