//! Filesystem-quota isolator.
//!
//! Each container sandbox, and each persistent volume a container mounts,
//! is stamped with an XFS project ID taken from a configured range. The
//! quota policy decides whether the project's quota record only accounts
//! for usage or also limits it. IDs go back to the range once the
//! directory they were stamped on has been removed.

pub mod allocator;
pub mod policy;
pub mod process;
pub mod scan;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fencer_common::config::{FencerConfig, QuotaPolicy};
use fencer_common::error::{FencerError, Result};
use fencer_common::resources::Resources;
use fencer_common::types::{
    ContainerConfig, ContainerId, ContainerLaunchInfo, ContainerState, ResourceStatistics,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

use self::allocator::ProjectIdAllocator;
use self::process::{DiskIsolatorProcess, DiskSnapshot};
use crate::backend::QuotaBackend;
use crate::backend::host::HostQuota;
use crate::isolator::Isolator;
use crate::metrics::{ProjectIdGauges, ProjectIdMetrics};
use crate::signal::LimitationWatch;

const ACTOR_NAME: &str = "disk-isolator";
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
        reply: Reply<Result<()>>,
    },
    Watch {
        container_id: ContainerId,
        reply: Reply<LimitationWatch>,
    },
    Usage {
        container_id: ContainerId,
        reply: Reply<Result<ResourceStatistics>>,
    },
    Cleanup {
        container_id: ContainerId,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<DiskSnapshot>,
    },
}

/// Handle to the filesystem-quota isolator actor.
///
/// Cheap to clone. The actor stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct DiskIsolator {
    tx: mpsc::Sender<Command>,
    metrics: Arc<ProjectIdMetrics>,
}

impl DiskIsolator {
    /// Creates the isolator against the host's XFS quotas.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the work directory is not on XFS, project quotas are not
    /// enabled there, the process is not privileged, or the configuration
    /// is invalid.
    pub fn create(config: &FencerConfig) -> Result<Self> {
        Self::with_backend(config, HostQuota)
    }

    /// Creates the isolator on top of `backend`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub fn with_backend<B: QuotaBackend>(config: &FencerConfig, backend: B) -> Result<Self> {
        config.validate()?;
        let policy = config.quota_policy()?;
        let work_dir = config.work_dir.clone();

        if !backend.has_quota_privilege() {
            return Err(FencerError::PermissionDenied {
                message: "the disk isolator requires root privileges".into(),
            });
        }
        if !backend.is_quota_filesystem(&work_dir) {
            return Err(FencerError::Unsupported {
                message: format!("work directory '{}' is not on an XFS filesystem", work_dir.display()),
            });
        }
        if !backend.is_quota_enabled(&work_dir)? {
            return Err(FencerError::Unsupported {
                message: format!("project quotas are not enabled for '{}'", work_dir.display()),
            });
        }

        let project_ids = config.project_ids()?;
        fencer_core::quota::validate_project_ids(&project_ids)?;

        let metrics = Arc::new(ProjectIdMetrics::default());
        let allocator = ProjectIdAllocator::new(project_ids, Arc::clone(&metrics));
        let process = DiskIsolatorProcess::new(backend, policy, work_dir, allocator);

        let timers = Timers {
            check: (policy == QuotaPolicy::EnforcingActive).then(|| config.disk_check_interval()),
            reclaim: config.project_reclaim_interval(),
        };
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        drop(tokio::spawn(run(process, rx, timers)));
        tracing::info!(?policy, "disk isolator started");

        Ok(Self { tx, metrics })
    }

    /// Current project-ID gauges.
    #[must_use]
    pub fn gauges(&self) -> ProjectIdGauges {
        self.metrics.snapshot()
    }

    /// Captures the actor's current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor has stopped.
    pub async fn snapshot(&self) -> Result<DiskSnapshot> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let stopped = || FencerError::ActorStopped { name: ACTOR_NAME };
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

impl Isolator for DiskIsolator {
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
        .await?
    }

    async fn watch(&self, container_id: &ContainerId) -> Result<LimitationWatch> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Watch { container_id, reply }).await
    }

    async fn usage(&self, container_id: &ContainerId) -> Result<ResourceStatistics> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Usage { container_id, reply }).await?
    }

    async fn cleanup(&self, container_id: &ContainerId) -> Result<()> {
        let container_id = container_id.clone();
        self.call(|reply| Command::Cleanup { container_id, reply }).await
    }
}

struct Timers {
    /// Set only under active enforcement.
    check: Option<Duration>,
    reclaim: Duration,
}

/// One unit of work for the actor.
enum Step {
    Command(Command),
    Check,
    Reclaim,
}

async fn run<B: QuotaBackend>(
    mut process: DiskIsolatorProcess<B>,
    mut rx: mpsc::Receiver<Command>,
    timers: Timers,
) {
    let check_every = timers.check.unwrap_or(timers.reclaim);
    let check = sleep(check_every);
    let reclaim = sleep(timers.reclaim);
    tokio::pin!(check, reclaim);

    loop {
        let step = tokio::select! {
            command = rx.recv() => match command {
                Some(command) => Step::Command(command),
                None => break,
            },
            () = &mut check, if timers.check.is_some() => Step::Check,
            () = &mut reclaim => Step::Reclaim,
        };
        let (checked, reclaimed) = (matches!(step, Step::Check), matches!(step, Step::Reclaim));

        let Some(next) = offload(process, move |process| match step {
            Step::Command(command) => handle(process, command),
            Step::Check => process.check(),
            Step::Reclaim => process.reclaim_project_ids(),
        })
        .await
        else {
            break;
        };
        process = next;

        if checked {
            check.as_mut().reset(Instant::now() + check_every);
        }
        if reclaimed {
            reclaim.as_mut().reset(Instant::now() + timers.reclaim);
        }
    }
    tracing::debug!("disk isolator stopped");
}

/// Runs `step` on the blocking pool and hands the process back; `None` if
/// the step panicked.
async fn offload<B, F>(mut process: DiskIsolatorProcess<B>, step: F) -> Option<DiskIsolatorProcess<B>>
where
    B: QuotaBackend,
    F: FnOnce(&mut DiskIsolatorProcess<B>) + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        step(&mut process);
        process
    });
    match task.await {
        Ok(process) => Some(process),
        Err(e) => {
            tracing::error!(error = %e, "disk isolator step panicked");
            None
        }
    }
}

fn handle<B: QuotaBackend>(process: &mut DiskIsolatorProcess<B>, command: Command) {
    match command {
        Command::Recover {
            states,
            orphans,
            reply,
        } => match process.recover(&states, &orphans) {
            Ok(unowned) => {
                // Recovery does not wait for these cleanups.
                let _ = reply.send(Ok(()));
                for container_id in unowned {
                    tracing::info!(container_id = %container_id, "cleaning up unknown container");
                    process.cleanup(&container_id);
                }
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        },
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
            let _ = reply.send(process.update(&container_id, &resources));
        }
        Command::Watch { container_id, reply } => {
            let _ = reply.send(process.watch(&container_id));
        }
        Command::Usage { container_id, reply } => {
            let _ = reply.send(process.usage(&container_id));
        }
        Command::Cleanup { container_id, reply } => {
            process.cleanup(&container_id);
            let _ = reply.send(());
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(process.snapshot());
        }
    }
}
