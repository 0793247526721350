//! Backends that query the running host.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use fencer_common::config::FencerConfig;
use fencer_common::error::{FencerError, Result};
use fencer_common::types::ContainerId;
use fencer_core::net::{self, AddressFamily, SocketInfo};
use fencer_core::quota::{self, QuotaInfo, xfs};
use fencer_core::{cgroup, process};

use super::{PortProbe, QuotaBackend};

/// XFS project quotas through ioctls and `quotactl(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostQuota;

impl QuotaBackend for HostQuota {
    fn get_project_id(&self, path: &Path) -> Result<Option<u32>> {
        xfs::get_project_id(path)
    }

    fn set_project_id(&self, path: &Path, project_id: u32) -> Result<()> {
        xfs::set_project_id(path, project_id)
    }

    fn get_project_quota(&self, path: &Path, project_id: u32) -> Result<Option<QuotaInfo>> {
        xfs::get_project_quota(path, project_id)
    }

    fn set_project_quota(
        &self,
        path: &Path,
        project_id: u32,
        soft_limit: u64,
        hard_limit: u64,
    ) -> Result<()> {
        xfs::set_project_quota(path, project_id, soft_limit, hard_limit)
    }

    fn clear_project_quota(&self, path: &Path, project_id: u32) -> Result<()> {
        xfs::clear_project_quota(path, project_id)
    }

    fn device_for_path(&self, path: &Path) -> Result<PathBuf> {
        quota::device_for_path(path)
    }

    fn filesystem_used(&self, path: &Path) -> Result<u64> {
        quota::filesystem_used(path)
    }

    fn is_quota_filesystem(&self, path: &Path) -> bool {
        xfs::is_path_xfs(path)
    }

    fn is_quota_enabled(&self, path: &Path) -> Result<bool> {
        xfs::is_quota_enabled(path)
    }
}

/// Procfs and cgroupfs queries for port attribution.
#[derive(Debug, Clone)]
pub struct HostProbe {
    proc_root: PathBuf,
    hierarchy: PathBuf,
    cgroups_root: String,
}

impl HostProbe {
    /// Creates a probe reading the given cgroup hierarchy and the host's
    /// procfs.
    #[must_use]
    pub fn new(hierarchy: impl Into<PathBuf>, cgroups_root: impl Into<String>) -> Self {
        Self {
            proc_root: PathBuf::from(net::PROC_ROOT),
            hierarchy: hierarchy.into(),
            cgroups_root: cgroups_root.into(),
        }
    }

    /// Creates a probe from the isolator configuration.
    #[must_use]
    pub fn from_config(config: &FencerConfig) -> Self {
        Self::new(&config.cgroups_hierarchy, config.cgroups_root.clone())
    }

    /// Reads procfs from `proc_root` instead of `/proc`.
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// The cgroup hierarchy this probe reads.
    #[must_use]
    pub fn hierarchy(&self) -> &Path {
        &self.hierarchy
    }
}

impl PortProbe for HostProbe {
    fn listening_sockets(&self) -> Result<HashMap<u64, SocketInfo>> {
        let mut sockets = net::listening_sockets_in(&self.proc_root, AddressFamily::Inet)?;
        // The IPv6 table is absent when the kernel has IPv6 disabled.
        match net::listening_sockets_in(&self.proc_root, AddressFamily::Inet6) {
            Ok(v6) => sockets.extend(v6),
            Err(FencerError::Io { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no IPv6 socket table");
            }
            Err(e) => return Err(e),
        }
        Ok(sockets)
    }

    fn cgroup_processes(&self, container_id: &ContainerId) -> Result<BTreeSet<u32>> {
        let cgroup = cgroup::container_cgroup(&self.cgroups_root, container_id);
        cgroup::processes(&self.hierarchy, &cgroup)
    }

    fn process_sockets(&self, pid: u32) -> Result<Vec<u64>> {
        process::process_sockets_in(&self.proc_root, pid)
    }

    fn cmdline(&self, pid: u32) -> Option<String> {
        process::cmdline_in(&self.proc_root, pid)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 4242 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn listening_sockets_tolerate_missing_ipv6_table() {
        let proc_root = tempfile::tempdir().expect("tempdir");
        fs::create_dir(proc_root.path().join("net")).expect("mkdir");
        fs::write(proc_root.path().join("net/tcp"), TCP).expect("write");

        let probe = HostProbe::new("/nonexistent", "fencer").with_proc_root(proc_root.path());
        let sockets = probe.listening_sockets().expect("sockets");
        assert_eq!(sockets.get(&4242).map(|s| s.local.port()), Some(8080));
    }

    #[test]
    fn cgroup_processes_follow_nesting() {
        let hierarchy = tempfile::tempdir().expect("tempdir");
        let dir = hierarchy.path().join("fencer/parent/child");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(cgroup::PROCS_FILE), "7\n9\n").expect("write");

        let probe = HostProbe::new(hierarchy.path(), "fencer");
        let id = ContainerId::nested(ContainerId::new("parent"), "child");
        let pids = probe.cgroup_processes(&id).expect("pids");
        assert_eq!(pids.into_iter().collect::<Vec<_>>(), vec![7, 9]);
        assert!(probe.cgroup_processes(&ContainerId::new("gone")).is_err());
    }
}
