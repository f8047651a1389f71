use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::fetch::handle_fetch_catalog;
use commands::run::handle_run;
use config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "Moviemart warehouse ETL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full extract-transform-load pass over the catalog blobs.
    Run {
        /// Insert only rows with unseen keys into the existing tables instead
        /// of rebuilding them from scratch.
        #[arg(long)]
        incremental: bool,
    },
    /// Refresh the domestic catalog and genre reference blobs from the
    /// upstream REST catalog.
    FetchCatalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run { incremental } => handle_run(&config, incremental).await,
        Command::FetchCatalog => handle_fetch_catalog(&config).await,
    }
}
