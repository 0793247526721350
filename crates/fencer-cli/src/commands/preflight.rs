//! `fencer preflight`: Check that the isolators can run on this host.

use clap::Args;
use fencer_common::config::FencerConfig;
use fencer_isolator::{DiskIsolator, NetworkPortsIsolator};

/// Arguments for the `preflight` command.
#[derive(Args, Debug)]
pub struct PreflightArgs {
    /// Skip the disk quota isolator.
    #[arg(long)]
    pub skip_disk: bool,

    /// Skip the network ports isolator.
    #[arg(long)]
    pub skip_ports: bool,
}

/// Executes the `preflight` command.
///
/// Constructs each isolator the way the agent would and reports the
/// outcome. The isolators are dropped again before returning.
///
/// # Errors
///
/// Returns an error if any checked isolator cannot be created.
pub async fn execute(args: &PreflightArgs, config: &FencerConfig) -> anyhow::Result<()> {
    let mut failed = 0;

    if !args.skip_disk {
        match DiskIsolator::create(config) {
            Ok(isolator) => {
                let gauges = isolator.gauges();
                println!("disk/xfs      ok");
                for (name, value) in gauges.named() {
                    println!("  {name:<40} {value}");
                }
                let snapshot = isolator.snapshot().await?;
                println!("  {:<40} {}", "scheduled reclamations", snapshot.scheduled.len());
            }
            Err(e) => {
                failed += 1;
                println!("disk/xfs      unavailable: {e}");
            }
        }
    }

    if !args.skip_ports {
        match NetworkPortsIsolator::create(config) {
            Ok(_isolator) => println!(
                "network/ports ok (every {}s under '{}')",
                config.ports_check_interval().as_secs(),
                config.cgroups_hierarchy.display()
            ),
            Err(e) => {
                failed += 1;
                println!("network/ports unavailable: {e}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} isolator(s) failed preflight");
    }
    Ok(())
}
