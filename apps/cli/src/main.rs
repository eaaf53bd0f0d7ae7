//! pubharvest CLI — publications harvest pipeline.
//!
//! Scrapes a paginated publications listing, transfers document and image
//! assets to an object store, and loads the assembled records into the
//! warehouse.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
