//! Network-ports isolator.
//!
//! Containers sharing the host network namespace can bind any port. This
//! isolator periodically asks the collector which ports each container is
//! listening on and raises a limitation when a container listens outside
//! its grant.

pub mod collector;
pub mod process;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fencer_common::config::FencerConfig;
use fencer_common::error::{FencerError, Result};
use fencer_common::resources::Resources;
use fencer_common::types::{ContainerConfig, ContainerId, ContainerLaunchInfo, ContainerState};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

use self::collector::{Listeners, PortsCollector};
use self::process::NetworkPortsProcess;
use crate::backend::PortProbe;
use crate::backend::host::HostProbe;
use crate::isolator::Isolator;
use crate::signal::LimitationWatch;

const ACTOR_NAME: &str = "network-ports-isolator";
const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Recover {
        states: Vec<ContainerState>,
        orphans: HashSet<ContainerId>,
        reply: Reply<Result<()>>,
    },
    Prepare {
        container_id: ContainerId,
        config: ContainerConfig,
        reply: Reply<Result<Option<ContainerLaunchInfo>>>,
    },
    Update {
        container_id: ContainerId,
        resources: Resources,
        reply: Reply<()>,
    },
    Watch {
        container_id: ContainerId,
        reply: Reply<LimitationWatch>,
    },
    Cleanup {
        container_id: ContainerId,
        reply: Reply<()>,
    },
}

/// Handle to the network-ports isolator actor.
///
/// Cheap to clone. The actor and its collector stop once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct NetworkPortsIsolator {
    tx: mpsc::Sender<Command>,
}

impl NetworkPortsIsolator {
    /// Creates the isolator against the host's procfs and cgroup
    /// hierarchy.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails off Linux, if the configured cgroup hierarchy does not exist,
    /// or if the configuration is invalid.
    pub fn create(config: &FencerConfig) -> Result<Self> {
        config.validate()?;
        if !cfg!(target_os = "linux") {
            return Err(FencerError::Unsupported {
                message: "the network ports isolator requires Linux".into(),
            });
        }
        let probe = HostProbe::from_config(config);
        if !probe.hierarchy().is_dir() {
            return Err(FencerError::Unsupported {
                message: format!(
                    "cgroup hierarchy '{}' does not exist",
                    probe.hierarchy().display()
                ),
            });
        }
        Ok(Self::with_probe(probe, config.ports_check_interval()))
    }

    /// Creates the isolator on top of `probe`, checking every
    /// `check_interval`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_probe<P: PortProbe>(probe: P, check_interval: Duration) -> Self {
        let collector = PortsCollector::spawn(Arc::new(probe));
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        drop(tokio::spawn(run(NetworkPortsProcess::new(), rx, collector, check_interval)));
        tracing::info!(interval_secs = check_interval.as_secs(), "network ports isolator started");
        Self { tx }
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let stopped = || FencerError::ActorStopped { name: ACTOR_NAME };
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

impl Isolator for NetworkPortsIsolator {
    async fn recover(&self, states: Vec<ContainerState>, orphans: HashSet<ContainerId>) -> Result<()> {
        self.call(|reply| Command::Recover {
            states,
            orphans,
            reply,
        })
        .await?
    }

    async fn prepare(
        &self,
        container_id: &ContainerId,
        config: ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Prepare {
            container_id,
            config,
            reply,
        })
        .await?
    }

    async fn update(&self, container_id: &ContainerId, resources: Resources) -> Result<()> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Update {
            container_id,
            resources,
            reply,
        })
        .await
    }

    async fn watch(&self, container_id: &ContainerId) -> Result<LimitationWatch> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Watch { container_id, reply }).await
    }

    async fn cleanup(&self, container_id: &ContainerId) -> Result<()> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Cleanup { container_id, reply }).await
    }
}

/// Resolves with the in-flight scan, or never if there is none.
async fn in_flight(scan: &mut Option<oneshot::Receiver<Listeners>>) -> Option<Listeners> {
    match scan {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

async fn run(
    mut process: NetworkPortsProcess,
    mut rx: mpsc::Receiver<Command>,
    collector: PortsCollector,
    check_interval: Duration,
) {
    let timer = sleep(check_interval);
    tokio::pin!(timer);
    let mut scan: Option<oneshot::Receiver<Listeners>> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => handle(&mut process, command),
                None => break,
            },
            () = &mut timer, if scan.is_none() => {
                scan = Some(collector.request(process.container_ids()));
            }
            listeners = in_flight(&mut scan) => {
                scan = None;
                match listeners {
                    Some(listeners) => process.check(&listeners),
                    None => tracing::warn!("port scan was dropped"),
                }
                timer.as_mut().reset(Instant::now() + check_interval);
            }
        }
    }
    tracing::debug!("network ports isolator stopped");
}

fn handle(process: &mut NetworkPortsProcess, command: Command) {
    match command {
        Command::Recover {
            states,
            orphans,
            reply,
        } => {
            let _ = reply.send(process.recover(&states, &orphans));
        }
        Command::Prepare {
            container_id,
            config,
            reply,
        } => {
            let _ = reply.send(process.prepare(&container_id, &config));
        }
        Command::Update {
            container_id,
            resources,
            reply,
        } => {
            process.update(&container_id, &resources);
            let _ = reply.send(());
        }
        Command::Watch { container_id, reply } => {
            let _ = reply.send(process.watch(&container_id));
        }
        Command::Cleanup { container_id, reply } => {
            process.cleanup(&container_id);
            let _ = reply.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use fencer_common::interval::IntervalSet;
    use fencer_common::types::{LimitationReason, LimitedResource};

    use super::*;
    use crate::backend::memory::StaticProbe;

    fn granted(ports: IntervalSet<u16>) -> ContainerConfig {
        ContainerConfig {
            resources: Resources {
                disks: Vec::new(),
                ports: Some(ports),
            },
            ..ContainerConfig::default()
        }
    }

    #[tokio::test]
    async fn periodic_scan_limits_unallocated_port() {
        let probe = StaticProbe::new();
        let id = ContainerId::new("web");
        let isolator = NetworkPortsIsolator::with_probe(probe.clone(), Duration::from_millis(20));
        let _ = isolator
            .prepare(&id, granted(IntervalSet::closed(8080, 8081)))
            .await
            .expect("prepare");
        let watch = isolator.watch(&id).await.expect("watch");

        probe.listen(1, 8080);
        probe.listen(2, 9090);
        probe.spawn(&id, 10, &[1, 2]);

        let limitation = tokio::time::timeout(Duration::from_secs(10), watch.wait())
            .await
            .expect("limitation raised");
        assert_eq!(limitation.reason, LimitationReason::Ports);
        assert_eq!(limitation.resource, LimitedResource::Ports(IntervalSet::closed(9090, 9090)));
    }

    #[tokio::test]
    async fn unknown_container_calls_are_ignored() {
        let isolator = NetworkPortsIsolator::with_probe(StaticProbe::new(), Duration::from_secs(60));
        let ghost = ContainerId::new("ghost");
        isolator.update(&ghost, Resources::default()).await.expect("update");
        isolator.cleanup(&ghost).await.expect("cleanup");
        assert!(isolator.watch(&ghost).await.expect("watch").peek().is_none());
        assert!(isolator.supports_nesting());
    }

    #[tokio::test]
    async fn double_prepare_fails() {
        let isolator = NetworkPortsIsolator::with_probe(StaticProbe::new(), Duration::from_secs(60));
        let id = ContainerId::new("c1");
        let _ = isolator.prepare(&id, ContainerConfig::default()).await.expect("prepare");
        assert!(matches!(
            isolator.prepare(&id, ContainerConfig::default()).await,
            Err(FencerError::AlreadyPrepared { .. })
        ));
    }
}
