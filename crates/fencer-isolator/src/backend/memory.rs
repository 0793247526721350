//! In-memory backends.
//!
//! [`MemoryQuota`] models project stamps and quota records in a table
//! instead of on a filesystem; [`StaticProbe`] serves a fixed socket table
//! and cgroup membership. Both let the isolators run without XFS, root, or
//! live processes.

use std::collections::{BTreeSet, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fencer_common::error::{FencerError, Result};
use fencer_common::types::ContainerId;
use fencer_core::net::{AddressFamily, SocketInfo, SocketState};
use fencer_core::quota::QuotaInfo;

use super::{PortProbe, QuotaBackend};

#[derive(Debug, Default)]
struct QuotaTable {
    project_ids: HashMap<PathBuf, u32>,
    quotas: HashMap<u32, QuotaInfo>,
    unreadable: BTreeSet<PathBuf>,
    unwritable: BTreeSet<PathBuf>,
    failing_quotas: BTreeSet<u32>,
}

/// Quota backend keeping stamps and records in memory.
///
/// Clones share the same table, so a test can keep one clone to inspect
/// and mutate what the isolator sees.
#[derive(Debug, Clone)]
pub struct MemoryQuota {
    table: Arc<Mutex<QuotaTable>>,
    device: PathBuf,
    privileged: bool,
}

impl Default for MemoryQuota {
    fn default() -> Self {
        Self {
            table: Arc::default(),
            device: PathBuf::from("/dev/memory0"),
            privileged: true,
        }
    }
}

impl MemoryQuota {
    /// Creates an empty, privileged backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the process as lacking quota privilege.
    #[must_use]
    pub const fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    fn table(&self) -> MutexGuard<'_, QuotaTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamps `project_id` on `path` without going through an isolator.
    pub fn stamp(&self, path: impl Into<PathBuf>, project_id: u32) {
        let _ = self.table().project_ids.insert(path.into(), project_id);
    }

    /// Makes project-ID reads of `path` fail.
    pub fn fail_reads(&self, path: impl Into<PathBuf>) {
        let _ = self.table().unreadable.insert(path.into());
    }

    /// Makes stamping `path` fail.
    pub fn fail_writes(&self, path: impl Into<PathBuf>) {
        let _ = self.table().unwritable.insert(path.into());
    }

    /// Makes quota writes for `project_id` fail, including clears.
    pub fn fail_quota(&self, project_id: u32) {
        let _ = self.table().failing_quotas.insert(project_id);
    }

    /// Overrides the bytes charged to `project_id`.
    pub fn set_used(&self, project_id: u32, used: u64) {
        self.table().quotas.entry(project_id).or_default().used = used;
    }

    /// The project ID stamped on `path`, if any.
    #[must_use]
    pub fn project_id(&self, path: &Path) -> Option<u32> {
        self.table().project_ids.get(path).copied()
    }

    /// The quota record of `project_id`, if any.
    #[must_use]
    pub fn quota(&self, project_id: u32) -> Option<QuotaInfo> {
        self.table().quotas.get(&project_id).copied()
    }
}

fn denied(path: &Path, project_id: u32) -> FencerError {
    FencerError::Quota {
        path: path.to_path_buf(),
        project_id,
        source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    }
}

impl QuotaBackend for MemoryQuota {
    fn get_project_id(&self, path: &Path) -> Result<Option<u32>> {
        let table = self.table();
        if table.unreadable.contains(path) {
            return Err(denied(path, 0));
        }
        Ok(table.project_ids.get(path).copied())
    }

    fn set_project_id(&self, path: &Path, project_id: u32) -> Result<()> {
        let mut table = self.table();
        if table.unwritable.contains(path) {
            return Err(denied(path, project_id));
        }
        let _ = table.project_ids.insert(path.to_path_buf(), project_id);
        Ok(())
    }

    fn get_project_quota(&self, _path: &Path, project_id: u32) -> Result<Option<QuotaInfo>> {
        Ok(self.quota(project_id))
    }

    fn set_project_quota(
        &self,
        path: &Path,
        project_id: u32,
        soft_limit: u64,
        hard_limit: u64,
    ) -> Result<()> {
        let mut table = self.table();
        if table.failing_quotas.contains(&project_id) {
            return Err(denied(path, project_id));
        }
        let record = table.quotas.entry(project_id).or_default();
        record.soft_limit = soft_limit;
        record.hard_limit = hard_limit;
        Ok(())
    }

    fn clear_project_quota(&self, path: &Path, project_id: u32) -> Result<()> {
        self.set_project_quota(path, project_id, 0, 0)
    }

    fn device_for_path(&self, path: &Path) -> Result<PathBuf> {
        if path.exists() {
            Ok(self.device.clone())
        } else {
            Err(FencerError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn filesystem_used(&self, _path: &Path) -> Result<u64> {
        Ok(self.table().quotas.values().map(|q| q.used).sum())
    }

    fn is_quota_filesystem(&self, _path: &Path) -> bool {
        true
    }

    fn is_quota_enabled(&self, _path: &Path) -> Result<bool> {
        Ok(true)
    }

    fn has_quota_privilege(&self) -> bool {
        self.privileged
    }
}

#[derive(Debug, Default)]
struct ProbeTable {
    listening: HashMap<u64, SocketInfo>,
    cgroups: HashMap<ContainerId, BTreeSet<u32>>,
    sockets: HashMap<u32, Vec<u64>>,
}

/// Port probe serving a scripted host.
///
/// Clones share state, so the host can be changed while an isolator runs.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    table: Arc<Mutex<ProbeTable>>,
}

impl StaticProbe {
    /// Creates a probe with no sockets and no cgroups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, ProbeTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a listening socket on `0.0.0.0:port` with `inode`.
    pub fn listen(&self, inode: u64, port: u16) {
        let info = SocketInfo {
            family: AddressFamily::Inet,
            local: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            remote: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            state: SocketState::Listen,
            inode,
        };
        let _ = self.table().listening.insert(inode, info);
    }

    /// Places `pid` in the cgroup of `container_id`, holding `inodes`.
    pub fn spawn(&self, container_id: &ContainerId, pid: u32, inodes: &[u64]) {
        let mut table = self.table();
        let _ = table
            .cgroups
            .entry(container_id.clone())
            .or_default()
            .insert(pid);
        let _ = table.sockets.insert(pid, inodes.to_vec());
    }

    /// Places `pid` in a cgroup without a readable descriptor table, as if
    /// it exited mid-scan.
    pub fn spawn_exited(&self, container_id: &ContainerId, pid: u32) {
        let _ = self
            .table()
            .cgroups
            .entry(container_id.clone())
            .or_default()
            .insert(pid);
    }
}

impl PortProbe for StaticProbe {
    fn listening_sockets(&self) -> Result<HashMap<u64, SocketInfo>> {
        Ok(self.table().listening.clone())
    }

    fn cgroup_processes(&self, container_id: &ContainerId) -> Result<BTreeSet<u32>> {
        self.table()
            .cgroups
            .get(container_id)
            .cloned()
            .ok_or_else(|| FencerError::Io {
                path: PathBuf::from(container_id.to_string()),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }

    fn process_sockets(&self, pid: u32) -> Result<Vec<u64>> {
        self.table()
            .sockets
            .get(&pid)
            .cloned()
            .ok_or_else(|| FencerError::Io {
                path: PathBuf::from(format!("/proc/{pid}/fd")),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}
