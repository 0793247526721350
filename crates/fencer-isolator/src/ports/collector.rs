//! Port attribution.
//!
//! The collector runs as its own actor so that procfs and cgroupfs scans
//! never stall lifecycle calls on the ports isolator. Each scan is a fold
//! over the requested containers in which every failed lookup is logged
//! and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use fencer_common::error::{FencerError, Result};
use fencer_common::interval::IntervalSet;
use fencer_common::types::ContainerId;
use tokio::sync::{mpsc, oneshot};

use crate::backend::PortProbe;

/// Listening ports observed per container.
pub type Listeners = HashMap<ContainerId, IntervalSet<u16>>;

const ACTOR_NAME: &str = "ports-collector";

struct CollectRequest {
    container_ids: Vec<ContainerId>,
    reply: oneshot::Sender<Listeners>,
}

/// Handle to the collector actor.
#[derive(Debug, Clone)]
pub struct PortsCollector {
    tx: mpsc::Sender<CollectRequest>,
}

impl PortsCollector {
    /// Spawns the collector. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn<P: PortProbe>(probe: Arc<P>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        drop(tokio::spawn(run(probe, rx)));
        Self { tx }
    }

    /// Queues a scan of `container_ids` and returns where its result will
    /// arrive. The receiver errors if the scan could not be queued.
    #[must_use]
    pub fn request(&self, container_ids: Vec<ContainerId>) -> oneshot::Receiver<Listeners> {
        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.tx.try_send(CollectRequest { container_ids, reply }) {
            tracing::warn!(error = %e, "dropping port scan request");
        }
        rx
    }

    /// Scans `container_ids` and waits for the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector has stopped or is busy.
    pub async fn collect(&self, container_ids: Vec<ContainerId>) -> Result<Listeners> {
        self.request(container_ids)
            .await
            .map_err(|_| FencerError::ActorStopped { name: ACTOR_NAME })
    }
}

async fn run<P: PortProbe>(probe: Arc<P>, mut rx: mpsc::Receiver<CollectRequest>) {
    while let Some(CollectRequest { container_ids, reply }) = rx.recv().await {
        let probe = Arc::clone(&probe);
        match tokio::task::spawn_blocking(move || collect_listeners(probe.as_ref(), &container_ids)).await {
            Ok(listeners) => {
                let _ = reply.send(listeners);
            }
            Err(e) => tracing::error!(error = %e, "port scan panicked"),
        }
    }
    tracing::debug!("ports collector stopped");
}

/// Attributes the host's listening sockets to `container_ids` through the
/// processes in each container's cgroup.
///
/// A container whose cgroup cannot be read is left out; a process whose
/// descriptors cannot be read is skipped.
pub fn collect_listeners<P: PortProbe + ?Sized>(probe: &P, container_ids: &[ContainerId]) -> Listeners {
    let sockets = match probe.listening_sockets() {
        Ok(sockets) => sockets,
        Err(e) => {
            tracing::error!(error = %e, "failed to query listening sockets");
            return Listeners::new();
        }
    };
    if sockets.is_empty() {
        return Listeners::new();
    }

    container_ids.iter().fold(Listeners::new(), |mut listeners, container_id| {
        let pids = match probe.cgroup_processes(container_id) {
            Ok(pids) => pids,
            Err(e) => {
                tracing::warn!(container_id = %container_id, error = %e, "failed to list container processes");
                return listeners;
            }
        };

        for pid in pids {
            // The process may have exited since the cgroup was read.
            let inodes = match probe.process_sockets(pid) {
                Ok(inodes) => inodes,
                Err(e) => {
                    tracing::debug!(pid, error = %e, "failed to list process sockets");
                    continue;
                }
            };

            for socket in inodes.iter().filter_map(|inode| sockets.get(inode)) {
                let port = socket.local.port();
                if tracing::enabled!(tracing::Level::DEBUG) {
                    let command = probe.cmdline(pid).unwrap_or_else(|| format!("PID {pid}"));
                    tracing::debug!(container_id = %container_id, command, port, "listening");
                }
                *listeners.entry(container_id.clone()).or_default() += port;
            }
        }
        listeners
    })
}
