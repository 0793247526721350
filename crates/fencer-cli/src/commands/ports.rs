//! `fencer ports`: Attribute listening ports to containers.

use std::sync::Arc;

use clap::Args;
use fencer_common::config::FencerConfig;
use fencer_common::interval::IntervalSet;
use fencer_common::range::parse_u16_ranges;
use fencer_common::types::ContainerId;
use fencer_isolator::backend::host::HostProbe;
use fencer_isolator::ports::collector::PortsCollector;

/// Arguments for the `ports` command.
#[derive(Args, Debug)]
pub struct PortsArgs {
    /// Containers to scan, by the name of their cgroup under the
    /// configured root.
    #[arg(required = true)]
    pub container_ids: Vec<String>,

    /// Port grant to compare against, e.g. `[8080-8081, 9000]`.
    #[arg(long, value_parser = parse_u16_ranges)]
    pub grant: Option<IntervalSet<u16>>,
}

/// Executes the `ports` command.
///
/// Runs a single scan through the ports collector and prints what each
/// container listens on, and what falls outside `--grant` when given.
///
/// # Errors
///
/// Returns an error if the collector stops before answering.
pub async fn execute(args: PortsArgs, config: &FencerConfig) -> anyhow::Result<()> {
    let container_ids: Vec<ContainerId> = args.container_ids.into_iter().map(ContainerId::new).collect();
    let collector = PortsCollector::spawn(Arc::new(HostProbe::from_config(config)));
    let listeners = collector.collect(container_ids.clone()).await?;

    println!("{:<40} {:<30} {:<30}", "CONTAINER ID", "LISTENING", "UNALLOCATED");
    for id in &container_ids {
        let Some(observed) = listeners.get(id) else {
            println!("{id:<40} {:<30} {:<30}", "-", "-");
            continue;
        };
        let unallocated = args
            .grant
            .as_ref()
            .map_or_else(|| "-".to_string(), |grant| (observed - grant).to_string());
        println!("{id:<40} {:<30} {unallocated:<30}", observed.to_string());
    }
    Ok(())
}
