//! Trustline CLI: operator console for the storefront trust agent.
//!
//! Imports tenant data, runs orchestrated commands and drives the
//! draft → approve → publish and campaign workflows.

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
