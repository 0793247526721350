//! CLI command definitions and dispatch.

pub mod ports;
pub mod preflight;
pub mod quota;
pub mod sockets;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fencer_common::config::FencerConfig;

/// fencer: inspect and preflight the container resource isolators.
#[derive(Parser, Debug)]
#[command(name = "fencer", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Isolator configuration file (YAML). Defaults apply when omitted.
    #[arg(long, global = true, env = "FENCER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the host's listening TCP sockets.
    Sockets(sockets::SocketsArgs),
    /// Attribute listening ports to containers through their cgroups.
    Ports(ports::PortsArgs),
    /// Show the project ID and quota record of a directory.
    Quota(quota::QuotaArgs),
    /// Construct both isolators and report whether the host supports them.
    Preflight(preflight::PreflightArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Sockets(args) => sockets::execute(&args),
        Command::Ports(args) => ports::execute(args, &config).await,
        Command::Quota(args) => quota::execute(&args),
        Command::Preflight(args) => preflight::execute(&args, &config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FencerConfig> {
    match path {
        Some(path) => FencerConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display())),
        None => Ok(FencerConfig::default()),
    }
}
