//! PageBrief: submit a URL, stream back an AI summary, keep the history.
//!
//! `pagebrief serve` runs the HTTP API; the remaining subcommands inspect and
//! manage stored sessions directly.

mod commands;
mod routes;

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
