//! Identity CLI: reconcile contact records into canonical identities.
//!
//! Feeds email/phone signatures to the reconciler and inspects the
//! resulting contact clusters.

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
