//! # fencer: isolator diagnostics
//!
//! Inspects the host state the fencer isolators act on (listening
//! sockets, cgroup attribution, XFS project quotas) and checks that the
//! isolators can be constructed from a configuration file.

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    commands::execute(cli).await
}
