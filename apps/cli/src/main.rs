//! namex CLI: enrich domain records with page metadata and WHOIS expiry.
//!
//! Runs the enrichment pipeline in-process, or as a producer and a pool of
//! workers connected through a NATS JetStream work queue.

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
